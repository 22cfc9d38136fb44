//! `winprep` command-line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use winprep::archive::ZipUnarchiver;
use winprep::assets::DirAssetSource;
use winprep::cancel::{CancellationToken, ScratchDir, install_signal_handler};
use winprep::config::{ConstructOptions, DEFAULT_REBOOT_TIMEOUT};
use winprep::construct::{
    ConsoleMessenger, ConstructMessenger, ConstructTimings, OsVersionValidator, VmConstruct,
};
use winprep::enabler::WinRmManager;
use winprep::guest::GovcGuestManager;
use winprep::logging::init_logging;
use winprep::remote::WinRmRemoteManager;

#[derive(Parser, Debug)]
#[command(
    name = "winprep",
    version,
    about = "Prepares a Windows VM in vCenter to become a BOSH stemcell"
)]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Colorize log output.
    #[arg(long, global = true)]
    color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision an existing Windows VM so it can be exported as a stemcell.
    Construct(ConstructArgs),
}

#[derive(Args, Debug)]
struct ConstructArgs {
    /// IP address of the target VM.
    #[arg(long)]
    vm_ip: String,

    /// Administrator account on the target VM.
    #[arg(long)]
    vm_username: String,

    #[arg(long, env = "WINPREP_VM_PASSWORD", hide_env_values = true)]
    vm_password: String,

    /// Stemcell version in the form <major>.<minor>[.<patch>].
    #[arg(long)]
    stemcell_version: String,

    #[arg(long)]
    vcenter_url: String,

    #[arg(long)]
    vcenter_username: String,

    #[arg(long, env = "WINPREP_VCENTER_PASSWORD", hide_env_values = true)]
    vcenter_password: String,

    /// Inventory path of the VM, e.g. /datacenter/vm/folder/name.
    #[arg(long)]
    vm_inventory_path: String,

    /// PEM file with CA certificates for a vCenter using a private CA.
    #[arg(long)]
    vcenter_ca_certs: Option<PathBuf>,

    /// Extra switches passed to the setup script.
    #[arg(long, value_delimiter = ',')]
    setup_flags: Vec<String>,

    /// Directory containing LGPO.zip and StemcellAutomation.zip.
    #[arg(long, default_value = ".")]
    artifact_dir: PathBuf,

    /// Path to the govc binary.
    #[arg(long, default_value = "govc")]
    govc: PathBuf,

    /// Minutes to wait for the guest to finish rebooting.
    #[arg(long, default_value_t = DEFAULT_REBOOT_TIMEOUT.as_secs() / 60)]
    reboot_timeout_mins: u64,
}

impl From<ConstructArgs> for ConstructOptions {
    fn from(args: ConstructArgs) -> Self {
        ConstructOptions {
            vm_ip: args.vm_ip,
            vm_username: args.vm_username,
            vm_password: args.vm_password,
            stemcell_version: args.stemcell_version,
            vcenter_url: args.vcenter_url,
            vcenter_username: args.vcenter_username,
            vcenter_password: args.vcenter_password,
            vm_inventory_path: args.vm_inventory_path,
            vcenter_ca_certs: args.vcenter_ca_certs,
            setup_flags: args.setup_flags,
            artifact_dir: args.artifact_dir,
            govc: args.govc,
            reboot_timeout: Duration::from_secs(args.reboot_timeout_mins * 60),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.color);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("winprep: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Command::Construct(args) => construct(args.into()).await,
        }
    });

    if let Err(e) = result {
        eprintln!("winprep: {:#}", e);
        std::process::exit(1);
    }
}

async fn construct(options: ConstructOptions) -> anyhow::Result<()> {
    options.sanitize()?;

    let token = CancellationToken::new();
    let scratch = Arc::new(ScratchDir::new().context("failed to create scratch directory")?);
    let signals = install_signal_handler(token.clone(), scratch.clone());

    let result = run_construct(&options, scratch.clone(), token).await;

    signals.abort();
    scratch.cleanup();
    result
}

async fn run_construct(
    options: &ConstructOptions,
    scratch: Arc<ScratchDir>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let messenger: Arc<dyn ConstructMessenger> = Arc::new(ConsoleMessenger::stdout());
    let guest = Arc::new(GovcGuestManager::new(
        options.govc_options(),
        scratch,
        token.clone(),
    ));

    OsVersionValidator::new(guest.clone(), messenger.clone())
        .validate(&options.stemcell_version)
        .await?;

    let remote = Arc::new(WinRmRemoteManager::new(
        options.vm_ip.clone(),
        options.vm_username.clone(),
        options.vm_password.clone(),
        token.clone(),
    )?);
    let enabler = Arc::new(WinRmManager::new(
        guest.clone(),
        Arc::new(ZipUnarchiver),
        Arc::new(DirAssetSource::new(options.artifact_dir.clone())),
    ));

    let timings = ConstructTimings {
        reboot_timeout: options.reboot_timeout,
        ..ConstructTimings::default()
    };

    let metrics = VmConstruct::with_timings(
        options.session(),
        remote,
        guest,
        enabler,
        messenger,
        token,
        timings,
    )
    .prepare_vm()
    .await?;

    tracing::info!(phases = metrics.tasks().count(), "VM prepared");
    Ok(())
}
