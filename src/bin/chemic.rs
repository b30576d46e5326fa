//! Chemic CLI - drive the molecule-generation backend from the terminal
//!
//! Usage:
//!   chemic login <email> [--password <pw>]
//!   chemic generate --smiles <SMILES> [options]
//!   chemic history
//!   chemic show <generation-id>
//!
//! Example:
//!   chemic generate --example Aspirin --property QED --iterations 10

use anyhow::{anyhow, Context, Result};
use chemic::analysis::{classify, AnalysisBlock, Line};
use chemic::client::http::HttpTransport;
use chemic::client::{Algorithm, ChemClient, ChemError, GenerationRequest, Property};
use chemic::lookup::{image_url, ImageOptions, SynonymCache};
use chemic::normalize::{GenerationResult, HistoryEntry};
use chemic::session::{FileTokenStore, OutputSlot, Session};
use chemic::ChemConfig;
use colored::Colorize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// The named examples offered by the input form.
const SMILES_EXAMPLES: &[(&str, &str)] = &[
    ("Aspirin", "CC(=O)Oc1ccccc1C(=O)O"),
    (
        "Lisuride",
        "[H][C@@]12Cc3c[nH]c4cccc(C1=C[C@H](NC(=O)N(CC)CC)CN2C)c34",
    ),
    ("Caffeine", "CN1C=NC2=C1C(=O)N(C(=O)N2C)C"),
    ("Lenalidomide", "O=C1NC(=O)CCC1N3C(=O)c2cccc(c2C3)N"),
    (
        "Ensitrelvir",
        "Cn1cnc(CN2C(=O)N(Cc3cc(F)c(F)cc3F)C(=Nc3cc4cn(C)nc4cc3Cl)NC2=O)n1",
    ),
    ("Floxuridine", "O=c1[nH]c(=O)n([C@H]2C[C@H](O)[C@@H](CO)O2)cc1F"),
    ("Tolnaftate", "Cc1cccc(N(C)C(=S)Oc2ccc3ccccc3c2)c1"),
];

/// How long candidate display waits for PubChem names before falling back
/// to raw SMILES strings. Lookups that miss keep running in the background.
const NAME_LOOKUP_BUDGET: Duration = Duration::from_secs(2);

fn print_usage() {
    eprintln!(
        r#"
{} - Configure and run molecule generations against the ChemicAI backend

{}
    chemic <COMMAND> [OPTIONS]

{}
    login <email>             Obtain and persist a session token
    register <user> <email>   Create an account, then log in
    logout                    End the session and drop the stored token
    generate                  Submit a generation and render the result
    history                   List past generations
    show <generation-id>      Re-display a past generation

{}
    --smiles <S>              SMILES input (required unless --example)
    --example <NAME>          Use a named example (Aspirin, Caffeine, ...)
    --num <N>                 Number of molecules (default: 25)
    --algorithm <A>           CMA-ES or Spherical (default: CMA-ES)
    --property <P>            QED or plogP (default: QED)
    --minimize                Minimize the property instead of maximizing
    --similarity <F>          Similarity constraint in [0,1] (default: 0.3)
    --particles <N>           Particle count (default: 30)
    --iterations <N>          Iteration count (default: 10)

{}
    --config <PATH>           Config file (default: chemic.toml if present)
    --password <PW>           Password (or set CHEMIC_PASSWORD)
    -v, --verbose             Debug logging
    -h, --help                Print this help message

{}
    CHEMIC_API_URL            Overrides the configured base URL
"#,
        "Chemic CLI".bold(),
        "USAGE:".bold(),
        "COMMANDS:".bold(),
        "GENERATE OPTIONS:".bold(),
        "GLOBAL OPTIONS:".bold(),
        "ENVIRONMENT:".bold(),
    );
}

enum Command {
    Login { email: String },
    Register { username: String, email: String },
    Logout,
    Generate(GenerationRequest),
    History,
    Show { generation_id: String },
}

struct CliArgs {
    command: Command,
    config_path: Option<String>,
    password: Option<String>,
    verbose: bool,
}

fn parse_args() -> Result<CliArgs> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(if args.iter().any(|a| a == "--help" || a == "-h") {
            0
        } else {
            1
        });
    }

    let mut config_path = None;
    let mut password = std::env::var("CHEMIC_PASSWORD").ok();
    let mut verbose = false;

    let mut positional: Vec<String> = Vec::new();
    let mut smiles: Option<String> = None;
    let mut request = GenerationRequest::new("");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = args.get(i).cloned();
            }
            "--password" => {
                i += 1;
                password = args.get(i).cloned();
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--smiles" => {
                i += 1;
                smiles = args.get(i).cloned();
            }
            "--example" => {
                i += 1;
                let name = args.get(i).cloned().unwrap_or_default();
                let found = SMILES_EXAMPLES
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&name))
                    .map(|(_, s)| s.to_string())
                    .ok_or_else(|| anyhow!("unknown example: {name}"))?;
                smiles = Some(found);
            }
            "--num" => {
                i += 1;
                request.num_molecules = parse_flag(&args, i, "--num")?;
            }
            "--algorithm" => {
                i += 1;
                let raw: String = parse_flag(&args, i, "--algorithm")?;
                request.algorithm = Algorithm::from_str(&raw).map_err(|e| anyhow!(e))?;
            }
            "--property" => {
                i += 1;
                let raw: String = parse_flag(&args, i, "--property")?;
                request.property = Property::from_str(&raw).map_err(|e| anyhow!(e))?;
            }
            "--minimize" => {
                request.maximize = false;
            }
            "--similarity" => {
                i += 1;
                request.similarity = parse_flag(&args, i, "--similarity")?;
            }
            "--particles" => {
                i += 1;
                request.particles = parse_flag(&args, i, "--particles")?;
            }
            "--iterations" => {
                i += 1;
                request.iterations = parse_flag(&args, i, "--iterations")?;
            }
            other if !other.starts_with('-') => positional.push(other.to_string()),
            other => return Err(anyhow!("unknown option: {other}")),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        Some("login") => Command::Login {
            email: positional
                .get(1)
                .cloned()
                .ok_or_else(|| anyhow!("login requires an email"))?,
        },
        Some("register") => Command::Register {
            username: positional
                .get(1)
                .cloned()
                .ok_or_else(|| anyhow!("register requires a username and an email"))?,
            email: positional
                .get(2)
                .cloned()
                .ok_or_else(|| anyhow!("register requires a username and an email"))?,
        },
        Some("logout") => Command::Logout,
        Some("generate") => {
            request.smiles = smiles.ok_or_else(|| anyhow!("generate requires --smiles or --example"))?;
            Command::Generate(request)
        }
        Some("history") => Command::History,
        Some("show") => Command::Show {
            generation_id: positional
                .get(1)
                .cloned()
                .ok_or_else(|| anyhow!("show requires a generation id"))?,
        },
        Some(other) => return Err(anyhow!("unknown command: {other}")),
        None => return Err(anyhow!("no command given")),
    };

    Ok(CliArgs {
        command,
        config_path,
        password,
        verbose,
    })
}

fn parse_flag<T: FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    args.get(i)
        .ok_or_else(|| anyhow!("{flag} requires a value"))?
        .parse()
        .map_err(|_| anyhow!("invalid value for {flag}"))
}

fn load_config(path: Option<&str>) -> Result<ChemConfig> {
    let path = path.unwrap_or("chemic.toml");
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).with_context(|| format!("Failed to parse config file: {path}"))
        }
        Err(_) => Ok(ChemConfig::default()),
    }
}

fn print_header(base_url: &str, authenticated: bool) {
    eprintln!();
    eprintln!(
        "{}",
        "╭──────────────────────────────────────────────────────────────╮".blue()
    );
    eprintln!(
        "{}  {}                                       {}",
        "│".blue(),
        "Chemic - Molecule Generation".bold(),
        "│".blue()
    );
    eprintln!(
        "{}",
        "├──────────────────────────────────────────────────────────────┤".blue()
    );
    eprintln!("{}  {}  {}", "│".blue(), "Backend:".dimmed(), base_url);
    eprintln!(
        "{}  {}  {}",
        "│".blue(),
        "Session:".dimmed(),
        if authenticated {
            "authenticated"
        } else {
            "anonymous"
        }
    );
    eprintln!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".blue()
    );
    eprintln!();
}

fn print_analysis_block(block: &AnalysisBlock) {
    if let Some(category) = &block.category {
        eprintln!("  {}", format!("[{category}]").bold().cyan());
    }
    if let Some(intro) = &block.parsed.intro {
        eprintln!("  {intro}");
        eprintln!();
    }
    for section in &block.parsed.sections {
        if let Some(heading) = &section.heading {
            eprintln!("  {}", heading.bold());
        }
        for line in classify(&section.body) {
            match line {
                Line::Labeled {
                    label,
                    content,
                    children,
                } => {
                    eprintln!("    • {} {}", label.bold(), content);
                    for child in children {
                        eprintln!("        • {child}");
                    }
                }
                Line::Plain { text } => eprintln!("    • {text}"),
                Line::Blank => eprintln!(),
            }
        }
        eprintln!();
    }
}

fn print_result(result: &GenerationResult, names: &SynonymCache) {
    eprintln!(
        "{}",
        "╭──────────────────────────────────────────────────────────────╮".green()
    );
    eprintln!(
        "{}  {}                                          {}",
        "│".green(),
        if result.succeeded() {
            "Generation Complete".bold()
        } else {
            result.status.as_str().bold()
        },
        "│".green()
    );
    eprintln!(
        "{}",
        "├──────────────────────────────────────────────────────────────┤".green()
    );
    if let Some(algorithm) = &result.algorithm {
        eprintln!("{}  {}  {}", "│".green(), "Algorithm:".dimmed(), algorithm);
    }
    if let Some(original) = &result.original_smiles {
        eprintln!("{}  {}   {}", "│".green(), "Original:".dimmed(), original);
    }
    if let Some(property) = &result.optimized_property {
        eprintln!("{}  {}   {}", "│".green(), "Property:".dimmed(), property);
    }
    eprintln!(
        "{}  {}   {}",
        "│".green(),
        "Captured:".dimmed(),
        result.captured_at.format("%d/%m/%Y, %H:%M:%S")
    );
    eprintln!(
        "{}",
        "╰──────────────────────────────────────────────────────────────╯".green()
    );

    if !result.candidates.is_empty() {
        eprintln!();
        eprintln!("{}", "Generated Molecules".bold());
        for (index, candidate) in result.candidates.iter().enumerate() {
            let name = names.display_name(&candidate.smiles);
            let score = candidate
                .score
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            eprintln!(
                "  {} {} ({})",
                format!("{:>2}.", index + 1).dimmed(),
                name,
                score.green()
            );
            eprintln!("      {}", candidate.smiles.dimmed());
            if let Some(url) = image_url(&candidate.smiles, &ImageOptions::default()) {
                eprintln!("      {}", url.dimmed());
            }
        }
    }

    if let Some(analysis) = &result.analysis {
        eprintln!();
        eprintln!("{}", "Analysis".bold());
        eprintln!(
            "{}",
            "════════════════════════════════════════════════════════════════".green()
        );
        for block in analysis.parse_blocks() {
            print_analysis_block(&block);
        }
        eprintln!(
            "{}",
            "════════════════════════════════════════════════════════════════".green()
        );
    }
}

fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        eprintln!("{}", "No history yet.".dimmed());
        return;
    }
    for entry in entries {
        let id = entry
            .generation_id
            .clone()
            .unwrap_or_else(|| "(no id - unselectable)".to_string());
        let title = entry
            .pubchem_name
            .clone()
            .or_else(|| entry.smiles.clone())
            .unwrap_or_default();
        eprintln!("  {} {}", format!("#{id}").bold(), title);
        let mut details: Vec<String> = Vec::new();
        if let Some(algorithm) = &entry.algorithm {
            details.push(format!("algorithm {algorithm}"));
        }
        if let Some(property) = &entry.property {
            details.push(format!("property {property}"));
        }
        if let Some(n) = entry.num_molecules {
            details.push(format!("molecules {n}"));
        }
        if let Some(s) = entry.similarity {
            details.push(format!("similarity {s}"));
        }
        if !details.is_empty() {
            eprintln!("      {}", details.join(" | ").dimmed());
        }
        if let Some(timestamp) = &entry.timestamp {
            eprintln!("      {}", timestamp.dimmed());
        }
    }
}

/// `CHEMIC_HOME` explicitly overrides the configured token directory.
fn token_dir(override_dir: Option<String>, config: &ChemConfig) -> String {
    override_dir.unwrap_or_else(|| config.token_dir.clone())
}

/// The list shown after a generation: the server's refreshed history, or
/// the locally derived entry when the refetch fails.
fn refreshed_history(
    derived: HistoryEntry,
    fetched: Result<Vec<HistoryEntry>, ChemError>,
) -> Vec<HistoryEntry> {
    match fetched {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(error = %e, "history refresh failed");
            vec![derived]
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config_path.as_deref())?;
    let base_url = std::env::var("CHEMIC_API_URL").unwrap_or_else(|_| config.base_url.clone());

    let mut session = Session::load(FileTokenStore::new(token_dir(
        std::env::var("CHEMIC_HOME").ok(),
        &config,
    )))
    .context("Failed to load the session token")?;

    let transport = Arc::new(HttpTransport::new(config.timeout_secs));
    let mut client =
        ChemClient::new(transport, &base_url).with_secure_context(config.secure_context);
    if let Some(token) = session.auth().token() {
        client.set_token(token);
    }

    print_header(&base_url, session.auth().is_authenticated());

    match args.command {
        Command::Login { email } => {
            let password = args
                .password
                .ok_or_else(|| anyhow!("login requires --password or CHEMIC_PASSWORD"))?;
            let token = client.login(&email, &password).await?;
            session
                .authenticate(token)
                .context("Failed to persist the session token")?;
            eprintln!("{}", "Logged in.".green().bold());
        }

        Command::Register { username, email } => {
            let password = args
                .password
                .ok_or_else(|| anyhow!("register requires --password or CHEMIC_PASSWORD"))?;
            client.register(&username, &email, &password).await?;
            // Mirror the web flow: registration is followed by a login.
            let token = client.login(&email, &password).await?;
            session
                .authenticate(token)
                .context("Failed to persist the session token")?;
            eprintln!("{}", "Account created and logged in.".green().bold());
        }

        Command::Logout => {
            client.logout().await;
            session
                .logout()
                .context("Failed to clear the session token")?;
            eprintln!("{}", "Logged out.".green().bold());
        }

        Command::Generate(request) => {
            let names = Arc::new(SynonymCache::new());
            let output: OutputSlot<GenerationResult> = OutputSlot::new();

            eprintln!("{}", "Generating molecules...".dimmed());
            let ticket = output.begin();
            let result = client.generate(&request).await?;
            output.complete(ticket, result);

            if let Some(result) = output.current() {
                let smiles: Vec<String> =
                    result.candidates.iter().map(|c| c.smiles.clone()).collect();
                names.resolve_within(&smiles, NAME_LOOKUP_BUDGET).await;
                print_result(&result, &names);

                // Push the derived entry immediately, then refresh from the
                // server; the refetched list supersedes it on success.
                let derived = HistoryEntry::from_submission(
                    &request,
                    &result,
                    result.captured_at.to_rfc3339(),
                );
                let entries = refreshed_history(derived, client.history().await);
                eprintln!();
                eprintln!("{}", "History".bold());
                print_history(&entries);
            }
        }

        Command::History => {
            let entries = client.history().await?;
            eprintln!("{}", "History".bold());
            print_history(&entries);
        }

        Command::Show { generation_id } => {
            let names = Arc::new(SynonymCache::new());
            let output: OutputSlot<GenerationResult> = OutputSlot::new();

            eprintln!("{}", "Fetching generation details...".dimmed());
            let ticket = output.begin();
            let detail = client.history_detail(&generation_id).await?;

            if let Some(smiles) = &detail.echoed.smiles {
                eprintln!("  {} {}", "Input SMILES:".dimmed(), smiles);
            }
            if let Some(minimize) = detail.echoed.minimize {
                eprintln!(
                    "  {} {}",
                    "Direction:".dimmed(),
                    if minimize { "minimize" } else { "maximize" }
                );
            }

            output.complete(ticket, detail.result);
            if let Some(result) = output.current() {
                let smiles: Vec<String> =
                    result.candidates.iter().map(|c| c.smiles.clone()).collect();
                names.resolve_within(&smiles, NAME_LOOKUP_BUDGET).await;
                print_result(&result, &names);
            }
        }
    }

    Ok(())
}
