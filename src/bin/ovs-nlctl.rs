//! Thin CLI layered on the library (§6, §10 of the design doc),
//! mirroring `original_source/ovs/main.go`'s `datapath create|delete|
//! list` dispatch tree with the `clap` derive API. Argument parsing is
//! explicitly out of scope for correctness (§1); this binary exists to
//! exercise the library end-to-end.

use clap::{Parser, Subcommand};

use ovs_netlink::openvswitch::Dpif;
use ovs_netlink::Result;

#[derive(Parser)]
#[command(name = "ovs-nlctl", about = "Open vSwitch datapath netlink client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create, delete or list OVS datapaths.
    Datapath {
        #[command(subcommand)]
        action: DatapathAction,
    },
}

#[derive(Subcommand)]
enum DatapathAction {
    /// Create one or more datapaths.
    Create { names: Vec<String> },
    /// Delete one or more datapaths.
    Delete { names: Vec<String> },
    /// List every datapath known to the kernel.
    List,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("ovs-nlctl: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Datapath { action } => match action {
            DatapathAction::Create { names } => {
                let mut dpif = Dpif::new()?;
                for name in names {
                    dpif.create_datapath(&name)?;
                }
            }
            DatapathAction::Delete { names } => {
                let mut dpif = Dpif::new()?;
                for name in names {
                    match dpif.lookup_datapath(&name)? {
                        Some(dp) => dpif.delete_datapath(&dp)?,
                        None => {
                            eprintln!("ovs-nlctl: cannot find datapath \"{name}\"");
                            std::process::exit(1);
                        }
                    }
                }
            }
            DatapathAction::List => {
                let mut dpif = Dpif::new()?;
                for name in dpif.enumerate_datapaths()?.keys() {
                    println!("{name}");
                }
            }
        },
    }

    Ok(())
}
