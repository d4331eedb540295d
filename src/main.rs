use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod catalog;
mod cli;
mod defaults;
mod emitter;
mod projection;
mod repository;
mod resolver;
mod versions;

use catalog::{ExtensionError, Locale};
use cli::{Action, Cli, ReturnCode};
use projection::ProjectionOptions;
use repository::Repository;
use resolver::Resolver;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    std::process::exit(run_cli(std::env::args()).code());
}

fn run_cli<I>(args: I) -> ReturnCode
where
    I: IntoIterator<Item = String>,
{
    let cli = match cli::parse_action(args) {
        Ok(Action::Help(message)) => {
            println!("{message}");
            return ReturnCode::Ok;
        }
        Ok(Action::Generate(cli)) => cli,
        Err((message, code)) => {
            eprintln!("{message}");
            return code;
        }
    };

    // A malformed locale is an argument error, not a runtime failure.
    let locale = match cli.locale.as_deref().map(Locale::parse).transpose() {
        Ok(locale) => locale,
        Err(err) => {
            eprintln!("{err}");
            return ReturnCode::BadArgument;
        }
    };

    match generate(&cli, locale) {
        Ok(()) => ReturnCode::Ok,
        Err(err) => {
            if let Some(extension_error) = err.downcast_ref::<ExtensionError>() {
                eprintln!("{extension_error}");
                return match extension_error {
                    ExtensionError::NotFound(_) => ReturnCode::ProductExtNotFound,
                    ExtensionError::NotDefined(_) => ReturnCode::ProductExtNotDefined,
                    ExtensionError::NoFeaturesFound(_) => ReturnCode::ProductExtNoFeaturesFound,
                };
            }
            eprintln!("{err:?}");
            ReturnCode::RuntimeException
        }
    }
}

fn generate(cli: &Cli, locale: Option<Locale>) -> Result<()> {
    let catalogs = catalog::load_catalogs(&cli.install_dir, cli.product_extension.as_deref())
        .context("load feature catalog")?;

    let mut roots = Vec::new();
    if let Some(name) = cli.product_extension.as_deref() {
        // The extension root is already validated by the catalog load.
        roots.push(catalog::extension_root(&cli.install_dir, name)?);
    }
    roots.push(cli.install_dir.clone());
    let mut resolver = Resolver::new(&catalogs, Repository::new(roots));

    let options = ProjectionOptions {
        locale,
        include_beta: cli.include_beta,
        runtime_versions: !cli.no_runtime_versions,
    };

    let mut projections = Vec::new();
    for feature in catalogs.projected().features.values() {
        projections.push(projection::build_projection(&mut resolver, feature, &options));
    }
    tracing::info!(count = projections.len(), "feature projections built");

    let sections = defaults::build_default_config_sections(&mut resolver)
        .context("merge default configuration")?;

    emitter::write_feature_list(&cli.output, &cli.encoding, &projections, &sections)
        .context("write feature list")?;
    Ok(())
}
