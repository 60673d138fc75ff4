use clap::{Parser, Subcommand};
use arcprobe::archive::{Archive, EngineOptions};
use arcprobe::descriptor::Probe;
use arcprobe::formats::builtin_registry;
use arcprobe::progress::NoProgress;
use arcprobe::resource::Replacement;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arcprobe", about = "Identify and unpack game container files")]
struct Cli {
    /// Lowest score accepted as a match
    #[arg(long, global = true, default_value_t = EngineOptions::default().min_score)]
    min_score: u32,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in formats
    Formats,
    /// Score every format against a file
    Identify {
        input: PathBuf,
    },
    /// List archive contents
    List {
        input: PathBuf,
        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract members
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Extract a single member
        #[arg(long)]
        only: Option<String>,
    },
    /// Replace one member and write a new archive
    Replace {
        input: PathBuf,
        #[arg(long)]
        entry: String,
        #[arg(long = "with")]
        with: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rename one member and write a new archive
    Rename {
        input: PathBuf,
        #[arg(long)]
        entry: String,
        #[arg(long)]
        to: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode every member and print its CRC-32
    Verify {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(level));

    let registry = builtin_registry();
    let opts = EngineOptions { min_score: cli.min_score, ..EngineOptions::default() };

    match cli.command {

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats => {
            println!("{:<14} {:<16} {:<10} {:<18} Games", "Id", "Name", "Ext", "Capabilities");
            for (d, enabled) in registry.iter() {
                let info = d.info();
                let caps = info.capabilities;
                let flags: Vec<&str> = [
                    (caps.read, "read"), (caps.write, "write"),
                    (caps.replace, "replace"), (caps.rename, "rename"),
                ]
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, name)| *name)
                .collect();
                println!("{:<14} {:<16} {:<10} {:<18} {}{}",
                    info.id, info.name, info.extensions.join(","), flags.join(","),
                    info.games.join(", "), if enabled { "" } else { " (disabled)" });
            }
        }

        // ── Identify ─────────────────────────────────────────────────────────
        Commands::Identify { input } => {
            let mut probe = Probe::open(&input, opts.probe_buffer, opts.limits)?;
            let head_len = probe.size().min(16) as usize;
            let head = probe.reader().read_bytes(head_len)?;
            println!("File: {} ({} bytes)", input.display(), probe.size());
            println!("Head: {}", hex::encode(&head));
            for c in registry.rank(&mut probe) {
                let marker = if c.score >= opts.min_score { "*" } else { " " };
                let why: Vec<String> = c.breakdown.iter().map(|(r, p)| format!("{r} +{p}")).collect();
                println!(" {marker} {:<14} {:>4}  {}", c.id(), c.score, why.join(", "));
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let ar = Archive::open(&input, &registry, &opts)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ar.manifest())?);
            } else {
                println!("Archive: {} ({})", input.display(), ar.descriptor().info().name);
                println!("{:<40} {:>10} {:>10} {:>10}  Exporter", "Name", "Offset", "Stored", "Size");
                for r in ar.resources() {
                    println!("{:<40} {:>10} {:>10} {:>10}  {}",
                        r.name(), r.offset(), r.length(), r.decompressed_length(), r.exporter_name());
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir, only } => {
            let ar = Archive::open(&input, &registry, &opts)?;
            match only {
                Some(name) => {
                    let i = find(&ar, &name)?;
                    std::fs::create_dir_all(&output_dir)?;
                    let target = output_dir.join(leaf_name(ar.resources()[i].name()));
                    let n = ar.extract_to_path(i, &target)?;
                    println!("  extracted  {} ({n} bytes)", target.display());
                }
                None => {
                    let n = ar.extract_all(&output_dir, &mut NoProgress)?;
                    println!("Extracted {n} member(s) to: {}", output_dir.display());
                }
            }
        }

        // ── Replace ──────────────────────────────────────────────────────────
        Commands::Replace { input, entry, with, output } => {
            let mut ar = Archive::open(&input, &registry, &opts)?;
            let i = find(&ar, &entry)?;
            ar.replace(i, Replacement::File(with))?;
            let report = ar.write_to(&output)?;
            println!("Wrote {} ({} bytes, {} field(s) patched)",
                output.display(), report.bytes_written, report.patched_fields);
        }

        // ── Rename ───────────────────────────────────────────────────────────
        Commands::Rename { input, entry, to, output } => {
            let mut ar = Archive::open(&input, &registry, &opts)?;
            let i = find(&ar, &entry)?;
            ar.rename(i, &to)?;
            ar.write_to(&output)?;
            println!("Renamed {entry} -> {to} in {}", output.display());
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let ar = Archive::open(&input, &registry, &opts)?;
            let mut failures = 0usize;
            for (i, r) in ar.resources().iter().enumerate() {
                match ar.checksum(i) {
                    Ok(crc) => println!("  {crc:08x}  {}", r.name()),
                    Err(e)  => {
                        failures += 1;
                        println!("  FAILED    {}: {e}", r.name());
                    }
                }
            }
            if failures > 0 {
                return Err(format!("{failures} member(s) failed to decode").into());
            }
            println!("All {} member(s) OK", ar.len());
        }
    }
    Ok(())
}

fn find(ar: &Archive, name: &str) -> Result<usize, Box<dyn std::error::Error>> {
    ar.find(name).ok_or_else(|| format!("No member named {name}").into())
}

fn leaf_name(name: &str) -> &str {
    let leaf = name.rsplit(['/', '\\']).next().unwrap_or(name);
    if leaf.is_empty() || leaf == ".." { "member.bin" } else { leaf }
}

