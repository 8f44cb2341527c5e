//! Minimal CLI surface over the container-lifecycle core (spec §6): not
//! the core itself, just enough to stand the crate up end to end against
//! an in-memory `VirtualMachineManager` since the real hypervisor backend
//! is out of scope here (see DESIGN.md).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use hypercell_constants::network::{STDIO_PORT_RANGE_SIZE, STDIO_PORT_RANGE_START};
use hypercell_container::ContainerLifecycle;
use hypercell_vmm_api::{FakeVmm, VirtualMachineManager};

#[derive(Parser)]
#[command(name = "vmctl", about = "Container-lifecycle core integration entrypoint")]
struct Cli {
    /// Path the booted guest's console output is logged to.
    #[arg(long)]
    bootlog: Option<PathBuf>,

    /// Path to the guest kernel image to boot.
    #[arg(long)]
    kernel: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "vmctl failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(path) = &cli.bootlog {
        info!(path = %path.display(), "boot log path configured");
    }
    if let Some(path) = &cli.kernel {
        info!(path = %path.display(), "kernel image path configured");
    }

    // No real Virtualization.framework/KVM/Firecracker backend is linked
    // into this binary — that integration is explicitly out of scope for
    // the container-lifecycle core (spec §1 Non-goals). Stand the
    // lifecycle up against the in-memory test double instead so the CLI
    // stays buildable and demonstrates the wiring.
    let vmm: Arc<dyn VirtualMachineManager> = Arc::new(FakeVmm::new(|_port, _guest_fd| {}));
    let _lifecycle = ContainerLifecycle::new(vmm, STDIO_PORT_RANGE_START, STDIO_PORT_RANGE_SIZE)?;

    warn!(
        "no production VirtualMachineManager backend is linked into vmctl; \
         running against an in-memory FakeVmm. Embed this crate with a real \
         hypervisor backend to boot actual containers."
    );

    Ok(())
}
