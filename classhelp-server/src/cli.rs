use clap::Parser;

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH     (default: ./config.yaml)
  DB_PATH         (default: data/classhelp.db)
  PORT            (default: 8090 or config.listen_port)
  GEMINI_API_KEY  (unset disables the AI rewrite endpoints)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "classhelp-server",
    version,
    about = "ClassHelp server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {}
