// Copyright 2020 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License.

//! The main buildstamp command-line interface.
//!
//! The CLI is a thin layer: it gathers version numbers from the environment,
//! settings from the configuration file and the command line, and hands them
//! to an [`app::Session`].

use anyhow::Result;
use log::{error, info, warn};
use std::path::PathBuf;
use structopt::StructOpt;

mod app;
mod config;
mod consistency;
mod env;
mod errors;
mod logger;
mod patchers;
mod product_code;
mod textfile;
mod version;

#[derive(Debug, PartialEq, StructOpt)]
#[structopt(about = "stamp version numbers into build inputs")]
struct BuildstampOptions {
    #[structopt(short = "v", long = "verbose", help = "Print debugging messages")]
    verbose: bool,

    #[structopt(
        long = "config",
        parse(from_os_str),
        help = "Path to the configuration file (default: buildstamp.toml)"
    )]
    config: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Commands,
}

trait Command {
    fn execute(self, cfg: config::ConfigurationFile) -> Result<i32>;
}

#[derive(Debug, PartialEq, StructOpt)]
enum Commands {
    #[structopt(name = "apply")]
    /// Stamp versions into files and check package consistency
    Apply(ApplyCommand),

    #[structopt(name = "check-deps")]
    /// Only check that projects agree on package versions
    CheckDeps(CheckDepsCommand),

    #[structopt(name = "product-code")]
    /// Print the installer product code derived for a version
    ProductCode(ProductCodeCommand),
}

impl Command for Commands {
    fn execute(self, cfg: config::ConfigurationFile) -> Result<i32> {
        match self {
            Commands::Apply(o) => o.execute(cfg),
            Commands::CheckDeps(o) => o.execute(cfg),
            Commands::ProductCode(o) => o.execute(cfg),
        }
    }
}

fn main() -> Result<()> {
    let BuildstampOptions {
        verbose,
        config: config_path,
        command,
    } = BuildstampOptions::from_args();

    if let Err(e) = logger::Logger::init(verbose) {
        eprintln!("error: cannot initialize logging backend: {}", e);
        std::process::exit(1);
    }

    let config_path = config_path.unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));

    let exitcode = match config::ConfigurationFile::get(&config_path)
        .and_then(|cfg| command.execute(cfg))
    {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            e.chain()
                .skip(1)
                .for_each(|cause| logger::Logger::print_cause(cause));
            1
        }
    };

    std::process::exit(exitcode);
}

// apply

#[derive(Debug, PartialEq, StructOpt)]
struct ApplyCommand {
    #[structopt(
        long = "intermediate-dir",
        parse(from_os_str),
        help = "Directory to search for project.assets.json dependency manifests"
    )]
    intermediate_dir: Option<PathBuf>,

    #[structopt(
        long = "exclude",
        help = "Wildcard pattern of project names to leave out of the consistency check"
    )]
    exclude: Vec<String>,

    #[structopt(
        required = true,
        parse(from_os_str),
        help = "Files or directories to stamp"
    )]
    paths: Vec<PathBuf>,
}

impl Command for ApplyCommand {
    fn execute(self, cfg: config::ConfigurationFile) -> Result<i32> {
        let ctx = version::VersionContext::from_env()?;

        if ctx.is_empty() {
            warn!("no BUILDSTAMP_* version variables are set; only templates will be rendered");
        }

        let config::ConfigurationFile {
            consistency: config::ConsistencyConfiguration {
                exclude: mut patterns,
                intermediate_dir,
            },
            scan,
        } = cfg;

        patterns.extend(self.exclude);
        let excludes = consistency::compile_excludes(&patterns)?;

        let registry = patchers::PatcherRegistry::default();
        let mut sess = app::Session::new(&registry, ctx);
        sess.exclude(excludes);

        for name in scan.skip_dirs {
            sess.skip_dir(name);
        }

        if let Some(dir) = self
            .intermediate_dir
            .or_else(|| intermediate_dir.map(PathBuf::from))
        {
            sess.intermediate_dir(dir);
        }

        for path in &self.paths {
            sess.add_path(path)?;
        }

        if let Some(v) = sess.version_context().version() {
            info!("stamping version {}", v);
        }

        let summary = sess.run()?;

        for path in &summary.modified {
            println!("{}", path.display());
        }

        Ok(0)
    }
}

// check-deps

#[derive(Debug, PartialEq, StructOpt)]
struct CheckDepsCommand {
    #[structopt(
        long = "exclude",
        help = "Wildcard pattern of project names to leave out of the check"
    )]
    exclude: Vec<String>,

    #[structopt(
        parse(from_os_str),
        help = "Directory to search for project.assets.json dependency manifests"
    )]
    dir: PathBuf,
}

impl Command for CheckDepsCommand {
    fn execute(self, cfg: config::ConfigurationFile) -> Result<i32> {
        let mut patterns = cfg.consistency.exclude;
        patterns.extend(self.exclude);
        let excludes = consistency::compile_excludes(&patterns)?;

        let manifests = consistency::collect_manifests(&self.dir)?;

        if manifests.is_empty() {
            warn!(
                "no dependency manifests found under `{}`",
                self.dir.display()
            );
        }

        let ledger = consistency::check(&manifests, &excludes)?;
        info!(
            "{} dependency manifest(s) agree on {} package version(s)",
            manifests.len(),
            ledger.len()
        );
        Ok(0)
    }
}

// product-code

#[derive(Debug, PartialEq, StructOpt)]
struct ProductCodeCommand {
    #[structopt(help = "The dotted numeric version of the release")]
    version: String,

    #[structopt(help = "The installer family's UpgradeCode GUID")]
    upgrade_code: String,
}

impl Command for ProductCodeCommand {
    fn execute(self, _cfg: config::ConfigurationFile) -> Result<i32> {
        let upgrade: product_code::ProductIdentifier = self.upgrade_code.parse()?;
        let code = product_code::derive(&self.version, &upgrade)?;
        println!("{}", code);
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_assets(root: &std::path::Path, project: &str, version: &str) {
        let obj = root.join(project).join("obj");
        fs::create_dir_all(&obj).unwrap();
        fs::write(
            obj.join(consistency::ASSETS_FILE_NAME),
            format!(
                r#"{{"targets": {{"netstandard2.0": {{"Newtonsoft.Json/{}": {{"type": "package"}}}}}}}}"#,
                version
            ),
        )
        .unwrap();
    }

    fn parse(args: &[&str]) -> Commands {
        let mut argv = vec!["buildstamp".to_owned()];
        argv.extend(args.iter().map(|a| (*a).to_owned()));
        BuildstampOptions::from_iter_safe(argv).unwrap().command
    }

    #[test]
    fn apply_combines_config_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_assets(root, "A", "12.0.1");
        write_assets(root, "B", "12.0.3");
        let root_arg = root.to_str().unwrap();

        let mut cfg = config::ConfigurationFile::default();
        cfg.consistency.intermediate_dir = Some(root_arg.to_owned());
        cfg.scan.skip_dirs.push("vendor".to_owned());

        let cmd = parse(&["apply", "--exclude", "B", root_arg]);
        assert_eq!(cmd.execute(cfg.clone()).unwrap(), 0);

        let cmd = parse(&["apply", root_arg]);
        let e = cmd.execute(cfg.clone()).unwrap_err();
        assert!(e.downcast_ref::<consistency::ConsistencyConflict>().is_some());

        cfg.consistency.exclude.push("A".to_owned());
        let cmd = parse(&["apply", root_arg]);
        assert_eq!(cmd.execute(cfg).unwrap(), 0);
    }

    #[test]
    fn check_deps_reports_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_assets(root, "A", "12.0.1");
        write_assets(root, "B", "12.0.1");
        let root_arg = root.to_str().unwrap();

        let cmd = parse(&["check-deps", root_arg]);
        assert_eq!(cmd.execute(config::ConfigurationFile::default()).unwrap(), 0);

        write_assets(root, "C", "13.0.1");
        let cmd = parse(&["check-deps", root_arg]);
        assert!(cmd.execute(config::ConfigurationFile::default()).is_err());
    }
}
