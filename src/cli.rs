//! CLI argument parsing and the process exit-code contract.
//!
//! The CLI is intentionally thin: it selects one action (help or generate)
//! and feeds the core; all policy lives behind it.
use clap::Parser;
use std::path::PathBuf;

/// Arguments for the feature-list generator.
#[derive(Parser, Debug)]
#[command(
    name = "featlist",
    version,
    about = "Generate a feature-list document for an installed feature catalog",
    after_help = "Examples:\n  featlist featureList.xml\n  featlist --locale cs_CZ --encoding UTF-8 featureList.xml\n  featlist --product-extension myExt --install-dir /opt/platform out.xml"
)]
pub struct Cli {
    /// Encoding label for the output document declaration
    #[arg(long, value_name = "CHARSET", default_value = "UTF-8")]
    pub encoding: String,

    /// Locale for descriptive headers, as lang[_territory]
    #[arg(long, value_name = "LOCALE")]
    pub locale: Option<String>,

    /// Generate the list for a registered product extension
    #[arg(long, value_name = "NAME")]
    pub product_extension: Option<String>,

    /// Installation root containing features/ and lib/
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub install_dir: PathBuf,

    /// Omit runtime-version compatibility output
    #[arg(long)]
    pub no_runtime_versions: bool,

    /// Include beta-marked configuration elements in the output
    #[arg(long)]
    pub include_beta: bool,

    /// Output path for the generated feature-list document
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,
}

/// Exit codes reported to the caller. The values are part of the tool's
/// contract with install scripting and must not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Ok,
    BadArgument,
    RuntimeException,
    ProductExtNotFound,
    ProductExtNotDefined,
    ProductExtNoFeaturesFound,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        match self {
            ReturnCode::Ok => 0,
            ReturnCode::BadArgument => 20,
            ReturnCode::RuntimeException => 21,
            ReturnCode::ProductExtNotFound => 26,
            ReturnCode::ProductExtNotDefined => 27,
            ReturnCode::ProductExtNoFeaturesFound => 28,
        }
    }
}

/// Control-flow selector produced by argument parsing. Never surfaces to the
/// caller; only a [`ReturnCode`] does.
#[derive(Debug)]
pub enum Action {
    Help(String),
    Generate(Box<Cli>),
}

/// Parses the process arguments into an action, or a message plus the exit
/// code to report.
pub fn parse_action<I, T>(args: I) -> Result<Action, (String, ReturnCode)>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(Action::Generate(Box::new(cli))),
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            Ok(Action::Help(err.to_string()))
        }
        Err(err) => Err((err.to_string(), ReturnCode::BadArgument)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_the_contract() {
        assert_eq!(ReturnCode::Ok.code(), 0);
        assert_eq!(ReturnCode::BadArgument.code(), 20);
        assert_eq!(ReturnCode::RuntimeException.code(), 21);
        assert_eq!(ReturnCode::ProductExtNotFound.code(), 26);
        assert_eq!(ReturnCode::ProductExtNotDefined.code(), 27);
        assert_eq!(ReturnCode::ProductExtNoFeaturesFound.code(), 28);
    }

    #[test]
    fn generate_action_parses_flags() {
        let action = parse_action([
            "featlist",
            "--locale",
            "cs_CZ",
            "--product-extension",
            "myExt",
            "out.xml",
        ])
        .expect("parses");
        let Action::Generate(cli) = action else {
            panic!("expected generate action");
        };
        assert_eq!(cli.locale.as_deref(), Some("cs_CZ"));
        assert_eq!(cli.product_extension.as_deref(), Some("myExt"));
        assert_eq!(cli.output, PathBuf::from("out.xml"));
        assert_eq!(cli.encoding, "UTF-8");
        assert!(!cli.no_runtime_versions);
    }

    #[test]
    fn help_is_an_internal_action_not_an_error() {
        let action = parse_action(["featlist", "--help"]).expect("help is not an error");
        assert!(matches!(action, Action::Help(_)));
    }

    #[test]
    fn unknown_flag_maps_to_bad_argument() {
        let (message, code) =
            parse_action(["featlist", "--bogus", "out.xml"]).expect_err("should fail");
        assert_eq!(code, ReturnCode::BadArgument);
        assert!(message.contains("--bogus"));
    }

    #[test]
    fn missing_output_path_maps_to_bad_argument() {
        let (_, code) = parse_action(["featlist"]).expect_err("should fail");
        assert_eq!(code, ReturnCode::BadArgument);
    }
}
