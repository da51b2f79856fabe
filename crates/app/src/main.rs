use std::fmt;

use learnhub_core::model::{CategorySlug, CourseId, ProgressScope, UserId};
use services::update_service::ChangeKind;
use services::{AppServices, Clock, LearnHubConfig, SessionUser};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidUserId { raw: String },
    InvalidScope { raw: String },
    InvalidFormat { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid user id: {raw}"),
            ArgsError::InvalidScope { raw } => {
                write!(f, "invalid --scope value: {raw} (expected global or <category>/<course>)")
            }
            ArgsError::InvalidFormat { raw } => write!(f, "invalid --format value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  learnhub progress  --user <uuid> [--scope global|<category>/<course>] [--db <sqlite_url>]");
    eprintln!("  learnhub admin     --as <uuid> [--format csv|json] [--db <sqlite_url>]");
    eprintln!("  learnhub whats-new [--mark-seen]");
    eprintln!("  learnhub catalog   [--category <slug>]");
    eprintln!();
    eprintln!("Without --db the remote backend is used when configured, otherwise memory.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LEARNHUB_DB_URL, LEARNHUB_API_URL, LEARNHUB_API_KEY, LEARNHUB_ACCESS_TOKEN,");
    eprintln!("  LEARNHUB_CONTENT_URL, LEARNHUB_PREFS_PATH, LEARNHUB_TOTAL_MODULES,");
    eprintln!("  LEARNHUB_GLOBAL_PASS_PERCENT, LEARNHUB_COURSE_PASS_PERCENT, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Progress,
    Admin,
    WhatsNew,
    Catalog,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "progress" => Some(Self::Progress),
            "admin" => Some(Self::Admin),
            "whats-new" => Some(Self::WhatsNew),
            "catalog" => Some(Self::Catalog),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Csv,
    Json,
}

struct Args {
    db_url: Option<String>,
    user: Option<UserId>,
    scope: ProgressScope,
    format: ExportFormat,
    category: Option<CategorySlug>,
    mark_seen: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("LEARNHUB_DB_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(normalize_sqlite_url),
            user: None,
            scope: ProgressScope::Global,
            format: ExportFormat::Csv,
            category: None,
            mark_seen: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = Some(normalize_sqlite_url(value));
                }
                "--user" | "--as" => {
                    let flag = if arg == "--user" { "--user" } else { "--as" };
                    let value = require_value(args, flag)?;
                    let id = value
                        .parse::<UserId>()
                        .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                    parsed.user = Some(id);
                }
                "--scope" => {
                    let value = require_value(args, "--scope")?;
                    parsed.scope = parse_scope(&value)?;
                }
                "--format" => {
                    let value = require_value(args, "--format")?;
                    parsed.format = match value.as_str() {
                        "csv" => ExportFormat::Csv,
                        "json" => ExportFormat::Json,
                        _ => return Err(ArgsError::InvalidFormat { raw: value }),
                    };
                }
                "--category" => {
                    let value = require_value(args, "--category")?;
                    parsed.category = Some(CategorySlug::new(value.trim()));
                }
                "--mark-seen" => parsed.mark_seen = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn require_user(&self, flag: &'static str) -> Result<UserId, ArgsError> {
        self.user.ok_or(ArgsError::MissingFlag { flag })
    }
}

fn parse_scope(raw: &str) -> Result<ProgressScope, ArgsError> {
    if raw == "global" {
        return Ok(ProgressScope::Global);
    }
    match raw.split_once('/') {
        Some((category, course)) if !category.is_empty() && !course.is_empty() => Ok(
            ProgressScope::course(CategorySlug::new(category), CourseId::new(course)),
        ),
        _ => Err(ArgsError::InvalidScope {
            raw: raw.to_string(),
        }),
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn build_services(
    args: &Args,
    config: &LearnHubConfig,
) -> Result<AppServices, Box<dyn std::error::Error>> {
    let clock = Clock::default_clock();
    match &args.db_url {
        Some(db_url) => {
            prepare_sqlite_file(db_url)?;
            Ok(AppServices::new_sqlite(db_url, config, clock).await?)
        }
        None => Ok(AppServices::from_config(config, clock)?),
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let config = LearnHubConfig::from_env()?;
    let app = build_services(&args, &config).await?;

    match cmd {
        Command::Progress => {
            let user = args.require_user("--user")?;
            let progress = app.aggregator_for(user, args.scope.clone());
            progress.load_progress().await?;
            let overall = progress.overall_progress(app.settings().total_modules());
            eprintln!(
                "{}% complete ({} completed, {} started, {} total)",
                overall.percentage, overall.completed, overall.started, overall.total
            );
            println!("{}", progress.export_progress()?);
            Ok(())
        }
        Command::Admin => {
            let user = args.require_user("--as")?;
            app.sign_in(
                SessionUser::new(user, "cli"),
                config.backend.access_token().map(str::to_string),
            );
            let admin = app.admin();
            if !admin.check_admin_status().await {
                return Err(services::AdminError::AccessDenied.into());
            }
            let users = admin.load_all_users().await?;
            tracing::info!(users = users.len(), "admin export ready");
            match args.format {
                ExportFormat::Csv => println!("{}", admin.export_users_csv()?),
                ExportFormat::Json => println!("{}", admin.export_progress_json()?),
            }
            Ok(())
        }
        Command::WhatsNew => {
            let updates = app.updates();
            updates.load().await?;
            let since = updates.updates_since_last_visit();
            if since.modules.is_empty() && since.features.is_empty() {
                println!("Nothing new since your last visit.");
            }
            for change in &since.modules {
                let label = match change.kind {
                    ChangeKind::New => "new",
                    ChangeKind::Updated => "updated",
                };
                let title = change.title.as_deref().unwrap_or(change.id.as_str());
                println!("[{label}] {title}");
                for line in &change.changes {
                    println!("    - {line}");
                }
            }
            for feature in &since.features {
                println!("[feature] {feature}");
            }
            if args.mark_seen {
                updates.mark_all_seen()?;
            }
            Ok(())
        }
        Command::Catalog => {
            let catalog = app.catalog();
            match &args.category {
                Some(category) => {
                    for course in catalog.courses(category).await? {
                        println!("{}\t{}", course.slug, course.title);
                    }
                }
                None => {
                    for category in catalog.categories().await? {
                        println!("{}\t{}", category.slug, category.title);
                    }
                }
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        Args::parse(&mut args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn scope_accepts_global_and_course_pairs() {
        assert_eq!(parse_scope("global").unwrap(), ProgressScope::Global);
        assert_eq!(
            parse_scope("software-dev/claude-code-training").unwrap(),
            ProgressScope::course(
                CategorySlug::new("software-dev"),
                CourseId::new("claude-code-training")
            )
        );
        assert!(matches!(
            parse_scope("software-dev/"),
            Err(ArgsError::InvalidScope { .. })
        ));
    }

    #[test]
    fn args_reject_bad_values() {
        assert!(matches!(
            parse(&["--user", "not-a-uuid"]),
            Err(ArgsError::InvalidUserId { .. })
        ));
        assert!(matches!(
            parse(&["--format", "xml"]),
            Err(ArgsError::InvalidFormat { .. })
        ));
        assert!(matches!(parse(&["--db"]), Err(ArgsError::MissingValue { .. })));
        assert!(matches!(parse(&["--bogus"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/dev.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/dev.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }
}
