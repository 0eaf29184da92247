use anyhow::{bail, Context};
use bureau_sstable::sstable::{Record, SsTable, SsTableOpenOptions};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    #[clap(flatten)]
    table: TableArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Args)]
struct TableArgs {
    /// Directory the table files live in.
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,

    /// File name prefix of the table.
    #[clap(short, long, default_value = "level_0_")]
    prefix: String,

    /// Creation timestamp, part of the file names.
    #[clap(short, long, default_value = "0")]
    timestamp: i64,

    #[clap(long, default_value = "4096")]
    index_block_size: usize,

    #[clap(long, default_value = "16384")]
    data_block_size: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Builds a table from `SET <key> <value>` and `DEL <key>` lines read from stdin.
    Write,
    /// Prints the value stored for a key.
    Get { key: String },
    /// Prints every record in key order.
    Dump,
    /// Deletes both table files.
    Remove,
}

impl TableArgs {
    fn options(&self) -> SsTableOpenOptions {
        SsTableOpenOptions::default()
            .with_prefix(self.prefix.clone())
            .with_timestamp(self.timestamp)
            .with_index_block_size(self.index_block_size)
            .with_data_block_size(self.data_block_size)
    }
}

enum Op {
    Set(String),
    Del,
}

fn parse_ops(input: impl BufRead) -> anyhow::Result<BTreeMap<String, Op>> {
    let mut ops = BTreeMap::new();

    for (n, line) in input.lines().enumerate() {
        let line = line?;
        let mut parts = line.trim().splitn(3, ' ');

        match (parts.next(), parts.next(), parts.next()) {
            (None | Some(""), _, _) => continue,
            (Some(cmd), Some(key), Some(value)) if cmd.eq_ignore_ascii_case("SET") => {
                ops.insert(key.to_string(), Op::Set(value.to_string()));
            }
            (Some(cmd), Some(key), None) if cmd.eq_ignore_ascii_case("DEL") => {
                ops.insert(key.to_string(), Op::Del);
            }
            _ => bail!("line {}: cannot parse '{}'", n + 1, line),
        }
    }

    Ok(ops)
}

fn print_record(out: &mut impl Write, key: &[u8], record: &Record) -> io::Result<()> {
    match record {
        Record::Value(value) => writeln!(
            out,
            "{} {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        ),
        Record::Deleted => writeln!(out, "{} <deleted>", String::from_utf8_lossy(key)),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let options = cli.table.options();

    match cli.command {
        Command::Write => {
            let ops = parse_ops(io::stdin().lock())?;
            let mut table = SsTable::new(&cli.table.dir, options);
            let mut writer = table.new_writer().context("could not create sstable")?;

            for (key, op) in &ops {
                let res = match op {
                    Op::Set(value) => writer.write(key.as_bytes(), value.as_bytes(), false),
                    Op::Del => writer.write(key.as_bytes(), &[], true),
                };
                res.with_context(|| format!("could not write key '{}'", key))?;
            }
            writer.commit()?;
            table.close()?;

            info!(keys = ops.len(), "sstable written");
        }
        Command::Get { key } => {
            let mut table = SsTable::load_from(&cli.table.dir, options);
            let mut reader = table.new_reader().context("could not open sstable")?;

            match reader.find_record(key.as_bytes())? {
                Some(record) => print_record(&mut io::stdout().lock(), key.as_bytes(), &record)?,
                None => println!("{} <not found>", key),
            }
            table.close()?;
        }
        Command::Dump => {
            let mut table = SsTable::load_from(&cli.table.dir, options);
            let mut reader = table.new_reader().context("could not open sstable")?;

            let mut out = io::stdout().lock();
            while let Some((key, record)) = reader.read_next()? {
                print_record(&mut out, &key, &record)?;
            }
            table.close()?;
        }
        Command::Remove => {
            let mut table = SsTable::load_from(&cli.table.dir, options);
            table.permanently_remove()?;
        }
    }

    Ok(())
}
