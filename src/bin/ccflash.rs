use std::path::PathBuf;

use ccflash::{
    cli::{
        config::Config, connect, hex_dump, parse_image, parse_u32, read_image, report_outcome,
        CcflashProgress, ConnectArgs,
    },
    command::{
        CommandType, MemoryAccess, StatusCode, MAX_MEMORY_READ_BYTES, MAX_MEMORY_READ_WORDS,
    },
    error::Error,
    flasher::{DefaultProgressCallback, ProgressCallbacks},
    logging::initialize_logger,
};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[command(about, propagate_version = true, version)]
struct Cli {
    /// Print debug logs and progress bars
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Erase the device and write an ELF image to its flash
    Flash(ImageArgs),
    /// Compare the flash contents of the device with an ELF image
    Verify(VerifyArgs),
    /// Synchronize, flash, verify and reset the device
    Program(ImageArgs),
    /// Synchronize with the bootloader
    Sync(ConnectArgs),
    /// Check that the bootloader responds
    Ping(ConnectArgs),
    /// Print the status of the last command the device executed
    GetStatus(ConnectArgs),
    /// Print the chip identifier
    ChipId(ConnectArgs),
    /// Erase the whole flash of the device
    BankErase(ConnectArgs),
    /// Reset the device
    Reset(ConnectArgs),
    /// Read and print device memory
    ReadMemory(ReadMemoryArgs),
    /// Write a field of the customer configuration area
    SetCcfg(SetCcfgArgs),
}

#[derive(Debug, Args)]
struct ImageArgs {
    /// ELF image to write
    image: PathBuf,

    #[clap(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    /// ELF image to compare against
    image: PathBuf,
    /// Number of extra read passes the device makes over each segment
    /// (experimental)
    #[arg(long, default_value_t = 0)]
    repeat: u32,

    #[clap(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct ReadMemoryArgs {
    /// Address to start reading from
    #[arg(value_parser = parse_u32)]
    address: u32,
    /// Number of bytes, or words with `--words`, to read
    count: u8,
    /// Use 32-bit accesses
    #[arg(long)]
    words: bool,

    #[clap(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct SetCcfgArgs {
    /// Field identifier
    #[arg(value_parser = parse_u32)]
    field: u32,
    /// Value to write to the field
    #[arg(value_parser = parse_u32)]
    value: u32,

    #[clap(flatten)]
    connect_args: ConnectArgs,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let cli = Cli::parse();
    initialize_logger(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    });
    debug!("{:#?}", cli.subcommand);

    // Load any user configuration, if present.
    let config = Config::load()?;

    match cli.subcommand {
        Commands::Flash(args) => report_outcome(flash(args, &config, cli.verbose)),
        Commands::Verify(args) => report_outcome(verify(args, &config)),
        Commands::Program(args) => report_outcome(program(args, &config, cli.verbose)),
        Commands::Sync(args) => sync(args, &config),
        Commands::Ping(args) => ping(args, &config),
        Commands::GetStatus(args) => get_status(args, &config),
        Commands::ChipId(args) => chip_id(args, &config),
        Commands::BankErase(args) => bank_erase(args, &config),
        Commands::Reset(args) => reset(args, &config),
        Commands::ReadMemory(args) => read_memory(args, &config),
        Commands::SetCcfg(args) => set_ccfg(args, &config),
    }
}

fn progress(verbose: bool) -> Box<dyn ProgressCallbacks> {
    if verbose {
        Box::new(CcflashProgress::default())
    } else {
        Box::new(DefaultProgressCallback)
    }
}

fn flash(args: ImageArgs, config: &Config, verbose: bool) -> Result<()> {
    // Parse the image before opening the port.
    let data = read_image(&args.image)?;
    let image = parse_image(&args.image, &data)?;

    let mut flasher = connect(&args.connect_args, config)?;
    flasher.flash(image.segments(), progress(verbose).as_mut())?;

    Ok(())
}

fn verify(args: VerifyArgs, config: &Config) -> Result<()> {
    let data = read_image(&args.image)?;
    let image = parse_image(&args.image, &data)?;

    let mut flasher = connect(&args.connect_args, config)?;
    if !flasher.verify(image.segments(), args.repeat)? {
        return Err(Error::VerifyFailed.into());
    }

    Ok(())
}

fn program(args: ImageArgs, config: &Config, verbose: bool) -> Result<()> {
    let data = read_image(&args.image)?;
    let image = parse_image(&args.image, &data)?;

    let mut flasher = connect(&args.connect_args, config)?;
    flasher.program(&image, progress(verbose).as_mut())?;

    Ok(())
}

fn sync(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    flasher.sync()?;
    info!("Synchronization success");

    Ok(())
}

fn ping(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    flasher.device().ping().map_err(Error::from)?;
    info!("Ping success");

    Ok(())
}

fn get_status(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    let status = flasher.device().get_status().map_err(Error::from)?;
    println!("{status}");

    Ok(())
}

fn chip_id(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    let id = flasher.device().get_chip_id().map_err(Error::from)?;
    println!("0x{id:08X}");

    Ok(())
}

fn bank_erase(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    flasher.erase_flash()?;
    info!("Bank erase success");

    Ok(())
}

fn reset(args: ConnectArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args, config)?;
    flasher.reset()?;
    info!("Device reset");

    Ok(())
}

fn read_memory(args: ReadMemoryArgs, config: &Config) -> Result<()> {
    let (access, max) = if args.words {
        (MemoryAccess::Words, MAX_MEMORY_READ_WORDS)
    } else {
        (MemoryAccess::Bytes, MAX_MEMORY_READ_BYTES)
    };
    if args.count > max {
        return Err(miette::miette!(
            "At most {max} units can be read at once, {} requested",
            args.count
        ));
    }

    let mut flasher = connect(&args.connect_args, config)?;
    let data = flasher
        .device()
        .memory_read(args.address, access, args.count)
        .map_err(Error::from)?;
    println!("{}", hex_dump(args.address, &data));

    Ok(())
}

fn set_ccfg(args: SetCcfgArgs, config: &Config) -> Result<()> {
    let mut flasher = connect(&args.connect_args, config)?;
    let device = flasher.device();

    device.set_ccfg(args.field, args.value).map_err(Error::from)?;
    match device.get_status().map_err(Error::from)? {
        StatusCode::Success => {
            info!("CCFG field {:#x} set to {:#x}", args.field, args.value);
            Ok(())
        }
        status => Err(Error::Rejected {
            command: CommandType::SetCcfg,
            status,
        }
        .into()),
    }
}

