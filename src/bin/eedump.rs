//! Command-line decoder for EEPROM-emulation dataflash dumps.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use eelog::eeprom::{self, erase_order, rh850, scan_blocks, Family, Reconstruction};
use eelog::image::DataflashImage;
use eelog::report;

/// Which on-flash layout to expect, as a command-line value.
#[derive(Debug, Clone, Copy)]
enum FamilyArg {
    V850,
    Rh850,
}

impl FromStr for FamilyArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v850" => Ok(Self::V850),
            "rh850" => Ok(Self::Rh850),
            _ => Err(anyhow::anyhow!("expected v850 or rh850")),
        }
    }
}

impl From<FamilyArg> for Family {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::V850 => Family::V850,
            FamilyArg::Rh850 => Family::Rh850,
        }
    }
}

/// An address argument, accepting `0x`-prefixed hex or plain decimal.
#[derive(Debug, Clone, Copy)]
struct Address(u32);

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let address = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };
        Ok(Self(address))
    }
}

#[derive(Args, Debug)]
struct OutputOptions {
    /// Write the record report here instead of printing it
    #[clap(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print each block's catalog entry and the oldest-to-newest scan order;
    /// this is a read-only sanity check of the dump
    Blocks {
        /// The on-flash layout to expect: v850 or rh850
        #[clap(long)]
        family: FamilyArg,
    },

    /// Decode a v850-generation dump and report its records
    V850 {
        #[clap(flatten)]
        output: OutputOptions,
    },

    /// Decode an rh850-generation dump and report its records
    Rh850 {
        /// The companion code image holding the record id/length table
        #[clap(long)]
        code_image: PathBuf,

        /// Address of the 16-byte table header inside the code image
        #[clap(long)]
        table_addr: Address,

        #[clap(flatten)]
        output: OutputOptions,
    },
}

impl Command {
    fn execute(self, raw: Vec<u8>) -> Result<()> {
        match self {
            Command::Blocks { family } => {
                let family = Family::from(family);
                let image = DataflashImage::new(raw, family.block_size())?;
                let catalog = scan_blocks(&image, family);

                for block in catalog.iter() {
                    if block.is_valid {
                        println!(
                            "{:4} => erase count {}, rwp {:#010x}",
                            block.index, block.erase_count, block.rwp
                        );
                    } else {
                        println!("{:4} => not active", block.index);
                    }
                }
                println!("scan order: {:?}", erase_order(&catalog));
            }

            Command::V850 { output } => {
                let image = DataflashImage::new(raw, Family::V850.block_size())?;
                let catalog = scan_blocks(&image, Family::V850);
                let decoded = eeprom::v850::reconstruct(&image, &catalog)?;
                report_decoded(&decoded, &output)?;
            }

            Command::Rh850 {
                code_image,
                table_addr,
                output,
            } => {
                let code =
                    fs::read(&code_image).with_context(|| code_image.display().to_string())?;
                let table = rh850::IdTable::load(&code, table_addr.0)?;

                let image = DataflashImage::new(raw, Family::Rh850.block_size())?;
                let catalog = scan_blocks(&image, Family::Rh850);
                let decoded = rh850::reconstruct(&image, &catalog, &table)?;
                report_decoded(&decoded, &output)?;
            }
        };

        Ok(())
    }
}

/// Print or export the record report; skipped slots go to stderr with
/// enough provenance to chase them in a hex editor.
fn report_decoded(decoded: &Reconstruction, output: &OutputOptions) -> Result<()> {
    for failure in &decoded.failures {
        eprintln!(
            "[-] skipped slot @ {:#010x} (id {:#06x}): {}",
            failure.address, failure.id, failure.error
        );
    }

    match &output.out {
        Some(path) => {
            let mut file = File::create(path).with_context(|| path.display().to_string())?;
            report::write_report(&mut file, &decoded.records)?;
            eprintln!(
                "[+] {} records written to {}",
                decoded.records.len(),
                path.display()
            );
        }
        None => report::write_report(&mut io::stdout().lock(), &decoded.records)?,
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the raw dataflash dump
    image: PathBuf,

    /// The decode command to run against this dump
    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    howudoin::init(howudoin::consumers::TermLine::default());

    let raw = fs::read(&args.image).with_context(|| args.image.display().to_string())?;
    args.cmd.execute(raw)
}
