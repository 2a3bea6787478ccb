use std::{
    io,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use color_eyre as ey;
use ey::eyre::{bail, Context as _};
use tessera_content::{path_parse, ContentConfig, Context, ObjectHandle, PathTable, TypeRegistry};
use tessera_shared::log::{self, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArguments {
    /// Log every step of the loader
    #[arg(short, long)]
    verbose: bool,

    /// Content configuration file
    #[arg(short, long, default_value = "content.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints how paths are split into their elements
    Parse {
        /// Paths like `/Packages/Weapons:Rifle#2`
        paths: Vec<String>,
    },
    /// Writes the loose sources of all cache mounts into their caches
    Cook,
    /// Lists the children of a package or object
    List {
        path: String,

        /// Also list the children of the children
        #[arg(short, long)]
        recursive: bool,
    },
    /// Loads objects and prints them
    Load {
        paths: Vec<String>,

        /// Read the objects again even when they are loaded
        #[arg(short, long)]
        force_reload: bool,
    },
}

fn main() -> ey::Result<()> {
    color_eyre::install()?;
    let command_line_arguments = CommandLineArguments::parse();

    // Setup logging
    let level = if command_line_arguments.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                tessera_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout())
        .apply()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

    match &command_line_arguments.command {
        Command::Parse { paths } => parse(paths),
        Command::Cook => cook(&command_line_arguments.config),
        Command::List { path, recursive } => list(&command_line_arguments.config, path, *recursive),
        Command::Load { paths, force_reload } => load(&command_line_arguments.config, paths, *force_reload),
    }
}

fn create_context(config_path: &Path) -> ey::Result<Context> {
    info!("Reading config {config_path:?}");
    let config = ContentConfig::from_file(config_path).wrap_err_with(|| format!("Failed to read config {config_path:?}"))?;
    Context::new(config, TypeRegistry::new().with_fallback()).wrap_err("Failed to create content context")
}

fn parse(paths: &[String]) -> ey::Result<()> {
    let table = PathTable::default();
    for path in paths {
        let elements = path_parse::parse(path).wrap_err_with(|| format!("Failed to parse '{path}'"))?;
        let handle = table.intern_path(path).wrap_err_with(|| format!("Failed to intern '{path}'"))?;
        println!("{}", table.display(handle));
        println!("  file path: {}", table.to_file_path_string(handle));
        for element in elements {
            let kind = if element.is_package { "package" } else { "object" };
            match element.instance_index {
                Some(instance_index) => println!("  {kind} '{}' instance {instance_index}", element.name),
                None => println!("  {kind} '{}'", element.name),
            }
        }
    }
    Ok(())
}

fn cook(config_path: &Path) -> ey::Result<()> {
    let context = create_context(config_path)?;
    let reports = context.cook().wrap_err("Failed to cook")?;
    let mut failures = 0;
    for (package, report) in &reports {
        println!(
            "{package}: {} cooked, {} up to date, {} failed",
            report.cooked.len(),
            report.up_to_date.len(),
            report.failed.len()
        );
        for (path, err) in &report.failed {
            println!("  {path}: {err}");
        }
        failures += report.failed.len();
    }
    if failures > 0 {
        bail!("{failures} objects failed to cook");
    }
    Ok(())
}

fn list(config_path: &Path, path: &str, recursive: bool) -> ey::Result<()> {
    let context = create_context(config_path)?;
    let table = context.path_table();
    let root = table.intern_path(path).wrap_err_with(|| format!("Invalid path '{path}'"))?;
    let mut pending = vec![(root, 0)];
    while let Some((path, depth)) = pending.pop() {
        let mut children = context
            .asset_loader()
            .enumerate_children(path)
            .wrap_err_with(|| format!("Failed to list '{}'", table.display(path)))?;
        children.reverse();
        for child in children {
            println!("{}{}", "  ".repeat(depth), table.display(child));
            if recursive {
                pending.push((child, depth + 1));
            }
        }
    }
    Ok(())
}

fn load(config_path: &Path, paths: &[String], force_reload: bool) -> ey::Result<()> {
    let context = create_context(config_path)?;
    for path in paths {
        let object = context
            .asset_loader()
            .load_object(path, force_reload)
            .wrap_err_with(|| format!("Failed to load '{path}'"))?;
        print_object(&object);
    }
    Ok(())
}

fn print_object(object: &ObjectHandle) {
    println!("{} ({})", object.path_string(), object.type_name());
    if let Some(template) = object.template() {
        println!("  template: {}", template.path_string());
    }
    if let Some(owner) = object.owner() {
        println!("  owner: {}", owner.path_string());
    }
    let data = object.read();
    for (field, reference) in data.references() {
        println!("  {field} -> {}", reference.path_string());
    }
    for line in data.properties().as_yaml().lines() {
        println!("  {line}");
    }
}
