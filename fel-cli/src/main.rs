use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use fel_core::api::{CertificationResult, TokenRecord};
use fel_core::certification::CertificationService;
use fel_core::company::Company;
use fel_core::config::FelConfig;
use fel_core::failure::JsonLinesFailureLog;
use fel_core::invoice::xml::render;
use fel_core::invoice::{QrGenerator, build_request, guatemala_now};
use fel_core::notify::LogNotifier;
use fel_core::pos::PosOrder;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const ISSUED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Parser)]
#[command(name = "fel")]
#[command(about = "Guatemala SAT FEL invoice certification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the DTE XML for an order without contacting the certifier.
    Render {
        #[arg(long)]
        company: PathBuf,
        #[arg(long)]
        order: PathBuf,
        /// Emission time as YYYY-MM-DDTHH:MM:SS; defaults to the current Guatemala time.
        #[arg(long)]
        issued_at: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Obtain (or reuse) a FEL token for the company.
    Token {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        company: PathBuf,
        #[arg(long)]
        token_cache: Option<PathBuf>,
    },
    /// Invoice an order and certify it.
    Certify {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        company: PathBuf,
        #[arg(long)]
        order: PathBuf,
        #[arg(long)]
        invoice_name: String,
        #[arg(long, default_value = "fel-failures.jsonl")]
        failure_log: PathBuf,
        #[arg(long)]
        token_cache: Option<PathBuf>,
        /// Write the resulting invoice JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Look up a taxpayer by NIT.
    VerifyNit {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        company: PathBuf,
        #[arg(long)]
        nit: String,
        #[arg(long)]
        token_cache: Option<PathBuf>,
    },
    /// Build the SAT verification QR for a certified document.
    Qr {
        #[arg(long)]
        number: String,
        #[arg(long)]
        authorization: String,
        #[arg(long)]
        emitter: String,
        #[arg(long, default_value = "CF")]
        receiver: String,
        #[arg(long)]
        verification_url: Option<String>,
        /// PNG destination; without it the image is printed as base64.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            company,
            order,
            issued_at,
            output,
        } => {
            let company: Company = read_json(&company)?;
            let order: PosOrder = read_json(&order)?;
            let issued_at = match issued_at {
                Some(raw) => NaiveDateTime::parse_from_str(&raw, ISSUED_AT_FORMAT)
                    .with_context(|| format!("invalid --issued-at '{raw}'"))?,
                None => guatemala_now(),
            };
            let request = build_request(&order, &company, issued_at)?;
            let xml = render(&request)?;
            emit(output.as_deref(), xml.as_bytes())?;
        }
        Commands::Token {
            config,
            company,
            token_cache,
        } => {
            let service = service(&config, None)?;
            let company: Company = read_json(&company)?;
            let credentials = company
                .credentials()
                .context("company has no FEL credentials")?;
            load_token_cache(&service, &company, token_cache.as_deref()).await?;
            service.tokens().get_valid_token(credentials).await?;
            let record = service
                .tokens()
                .snapshot(credentials)
                .await
                .context("token manager returned no record")?;
            store_token_cache(&service, &company, token_cache.as_deref()).await?;
            println!(
                "token for {} valid until {}",
                record.issued_to().unwrap_or(credentials.fel_user()),
                record.expires_at()
            );
        }
        Commands::Certify {
            config,
            company,
            order,
            invoice_name,
            failure_log,
            token_cache,
            output,
        } => {
            let service = service(&config, Some(&failure_log))?;
            let company: Company = read_json(&company)?;
            let mut order: PosOrder = read_json(&order)?;
            load_token_cache(&service, &company, token_cache.as_deref()).await?;

            let invoice = service
                .create_invoice(&company, &mut order, invoice_name)
                .await;
            store_token_cache(&service, &company, token_cache.as_deref()).await?;

            let json = serde_json::to_string_pretty(&invoice)?;
            emit(output.as_deref(), json.as_bytes())?;
            if !invoice.is_certified() {
                bail!(
                    "invoice {} was not certified: {}",
                    invoice.name(),
                    invoice.certification().note().unwrap_or("unknown error")
                );
            }
        }
        Commands::VerifyNit {
            config,
            company,
            nit,
            token_cache,
        } => {
            let service = service(&config, None)?;
            let company: Company = read_json(&company)?;
            load_token_cache(&service, &company, token_cache.as_deref()).await?;
            let verification = service.verify_nit(&company, &nit).await?;
            store_token_cache(&service, &company, token_cache.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&verification)?);
        }
        Commands::Qr {
            number,
            authorization,
            emitter,
            receiver,
            verification_url,
            output,
        } => {
            let generator = verification_url
                .map(QrGenerator::new)
                .unwrap_or_default();
            let result = CertificationResult {
                number,
                series: String::new(),
                authorization,
                certified_at: String::new(),
            };
            let image = generator.generate(Some(&result), &emitter, &receiver)?;
            if image.is_empty() {
                bail!("number and authorization are required to build a QR code");
            }
            match output {
                Some(path) => emit(Some(&path), image.as_png())?,
                None => println!("{}", image.to_base64()),
            }
        }
    }

    Ok(())
}

fn service(config: &Path, failure_log: Option<&Path>) -> Result<CertificationService> {
    let config = FelConfig::load(config)?;
    let log = failure_log.unwrap_or_else(|| Path::new("fel-failures.jsonl"));
    debug!(failure_log = %log.display(), "configured failure log");
    Ok(CertificationService::new(
        config,
        Arc::new(JsonLinesFailureLog::new(log)),
        Arc::new(LogNotifier),
    )?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn emit(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote output");
        }
        None => println!("{}", String::from_utf8_lossy(bytes)),
    }
    Ok(())
}

async fn load_token_cache(
    service: &CertificationService,
    company: &Company,
    cache: Option<&Path>,
) -> Result<()> {
    let (Some(path), Some(credentials)) = (cache, company.credentials()) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    match read_json::<TokenRecord>(path) {
        Ok(record) => service.tokens().seed(credentials, record).await,
        Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable token cache"),
    }
    Ok(())
}

async fn store_token_cache(
    service: &CertificationService,
    company: &Company,
    cache: Option<&Path>,
) -> Result<()> {
    let (Some(path), Some(credentials)) = (cache, company.credentials()) else {
        return Ok(());
    };
    if let Some(record) = service.tokens().snapshot(credentials).await {
        let json = serde_json::to_string_pretty(&record)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
