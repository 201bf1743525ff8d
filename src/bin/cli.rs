//! pstore CLI
//!
//! Operates a simulated flash device stored in an image file: format it,
//! read and change the GeneralService record, inspect the storage region,
//! or cut power in the middle of an update to watch the next start recover.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use pstore::service::{BleStack, GeneralService};
use pstore::storage::SwapState;
use pstore::{Config, FlashGeometry, Result, SimulatedFlash, StorageError, StorageManager};
use tracing_subscriber::{fmt, EnvFilter};

/// pstore CLI
#[derive(Parser, Debug)]
#[command(name = "pstore-cli")]
#[command(about = "Inspect and modify a simulated pstore flash image")]
#[command(version)]
struct Args {
    /// Flash image file
    #[arg(short, long, default_value = "./pstore_flash.img")]
    image: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a blank (fully erased) flash image
    Format {
        /// Flash page size in bytes
        #[arg(long, default_value = "1024")]
        page_size: u32,

        /// Number of code flash pages
        #[arg(long, default_value = "256")]
        code_pages: u32,

        /// Bootloader start address (hex with 0x prefix accepted)
        #[arg(long, value_parser = parse_address)]
        bootloader: Option<u32>,

        /// Number of data pages (one per application)
        #[arg(long, default_value = "2")]
        max_applications: u32,
    },

    /// Print the stored configuration record
    Show,

    /// Change record fields and save them
    Set {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        room: Option<String>,

        #[arg(long)]
        device_type: Option<String>,

        #[arg(long)]
        firmware: Option<i32>,
    },

    /// Show geometry, swap page state and erase counters
    Inspect,

    /// Rename the device but lose power after N flash operations
    InterruptUpdate {
        #[arg(long)]
        name: String,

        /// Flash operations allowed to complete before the power cut
        #[arg(long, default_value = "2")]
        after_ops: usize,

        /// Tear the operation in flight instead of dropping it
        #[arg(long)]
        torn: bool,
    },
}

/// Stand-in for the BLE stack
struct ConsoleStack {
    name: String,
}

impl BleStack for ConsoleStack {
    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn set_device_name(&mut self, name: &str) {
        tracing::info!("advertising as {:?}", name);
        self.name = name.to_string();
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pstore=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    tracing::info!("pstore CLI v{}", pstore::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Format {
            page_size,
            code_pages,
            bootloader,
            max_applications,
        } => {
            let mut builder = Config::builder()
                .page_size(page_size)
                .code_pages(code_pages)
                .max_applications(max_applications);
            builder = match bootloader {
                Some(address) => builder.bootloader_address(address),
                None => builder.without_bootloader(),
            };
            let config = builder.build();
            let geometry = FlashGeometry::try_from_config(&config).map_err(StorageError::Config)?;
            let flash = SimulatedFlash::new(geometry);
            flash.save_image(&args.image)?;
            tracing::info!("formatted {}", args.image.display());
            Ok(())
        }
        Commands::Show => {
            let (flash, mut storage) = boot(&args.image)?;
            let service = GeneralService::create(default_stack(), &mut storage)?;
            print_record(&service);
            flash.save_image(&args.image)
        }
        Commands::Set {
            name,
            room,
            device_type,
            firmware,
        } => {
            let (flash, mut storage) = boot(&args.image)?;
            let mut service = GeneralService::create(default_stack(), &mut storage)?;
            if let Some(name) = name {
                service.set_name(&name)?;
            }
            if let Some(room) = room {
                service.set_room(&room)?;
            }
            if let Some(device_type) = device_type {
                service.set_device_type(&device_type)?;
            }
            if let Some(version) = firmware {
                service.set_firmware_version(version);
            }
            service.save_persistent_storage(&mut storage)?;
            storage.run_until_idle();

            match service.last_completion() {
                Some(completion) => completion.result?,
                None => tracing::warn!("no completion reported for the save"),
            }
            print_record(&service);
            flash.save_image(&args.image)
        }
        Commands::Inspect => {
            let flash = SimulatedFlash::load_image(&args.image)?;
            let geometry = flash.geometry();
            let storage = StorageManager::open(config_for(&flash), flash.clone())?;

            println!("page size        {}", geometry.page_size);
            println!("flash size       {:#x}", geometry.total_size);
            println!("boundary         {:#x}", geometry.bootloader_boundary);
            println!("data region      {:#x}..{:#x}", geometry.data_start_addr(), geometry.data_end_addr());
            println!("swap page        {:#x}", geometry.swap_addr());
            println!("max block size   {}", geometry.max_block_size());
            match storage.swap_state()? {
                SwapState::Erased => println!("swap state       erased"),
                SwapState::Torn => println!("swap state       torn staging (will be discarded)"),
                SwapState::Committed(header) => println!(
                    "swap state       committed image for {:#x} ({} bytes)",
                    header.dest, header.len
                ),
            }
            let mut page = geometry.data_start_addr();
            while page <= geometry.swap_addr() {
                println!("erases {:#07x}    {}", page, flash.erase_count(page));
                page += geometry.page_size;
            }
            Ok(())
        }
        Commands::InterruptUpdate {
            name,
            after_ops,
            torn,
        } => {
            let (flash, mut storage) = boot(&args.image)?;
            let mut service = GeneralService::create(default_stack(), &mut storage)?;
            service.set_name(&name)?;
            service.save_persistent_storage(&mut storage)?;
            storage.process();

            for _ in 0..after_ops {
                match flash.complete_pending() {
                    Some(event) => storage.sys_event_handler(event),
                    None => break,
                }
                storage.process();
            }

            if torn {
                flash.tear_pending();
            } else {
                flash.power_cycle();
            }
            tracing::warn!("power lost after {} flash operations", after_ops);
            flash.save_image(&args.image)
        }
    }
}

/// Load the image, open the manager and let any recovery finish
fn boot(image: &Path) -> Result<(SimulatedFlash, StorageManager<SimulatedFlash>)> {
    let flash = SimulatedFlash::load_image(image)?;
    let mut storage = StorageManager::open(config_for(&flash), flash.clone())?;
    storage.run_until_idle();
    Ok((flash, storage))
}

fn config_for(flash: &SimulatedFlash) -> Config {
    let geometry = flash.geometry();
    Config::builder()
        .page_size(geometry.page_size)
        .code_pages(geometry.total_size / geometry.page_size)
        .bootloader_address(geometry.bootloader_boundary)
        .max_applications(geometry.max_applications)
        .build()
}

fn default_stack() -> ConsoleStack {
    ConsoleStack {
        name: "Crownstone".to_string(),
    }
}

fn print_record<S: BleStack>(service: &GeneralService<S>) {
    let record = service.record();
    println!("name         {}", record.name());
    println!("room         {}", record.room());
    println!("device type  {}", record.device_type());
    println!("firmware     {}", record.firmware_version);
}

fn parse_address(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", value, e))
}
