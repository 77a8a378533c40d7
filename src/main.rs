use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use thesaurus::bulk::ImportMode;
use thesaurus::db::Db;
use thesaurus::governance::{MergeMode, MergeOptions, ReportKind};
use thesaurus::graph::{Direction, ExpandInclude};
use thesaurus::{Config, TenantId, TermKind, Thesaurus, Viewpoint, VocabularyScope};

#[derive(Parser)]
#[command(name = "thesaurus", version, about = "Authority control and thesaurus maintenance")]
struct Cli {
    /// Tenant to operate on; falls back to thesaurus.default_tenant
    #[arg(long, global = true)]
    tenant: Option<Uuid>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Scope arguments shared by scope-level commands
#[derive(clap::Args)]
struct ScopeArgs {
    #[arg(long, default_value = "subject")]
    kind: TermKind,
    #[arg(long)]
    vocabulary: String,
}

impl ScopeArgs {
    fn scope(&self) -> VocabularyScope {
        VocabularyScope::new(self.kind, self.vocabulary.clone())
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and check the schema
    Verify,
    /// Top-level terms of a vocabulary
    Roots {
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Direct narrower terms
    Children {
        term: Uuid,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Breadcrumb paths from the hierarchy tops down to a term
    Ancestors {
        term: Uuid,
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        max_paths: Option<usize>,
    },
    /// Bounded subgraph around a term
    Graph {
        term: Uuid,
        #[arg(long, default_value = "descendants")]
        direction: Direction,
        #[arg(long)]
        depth: Option<usize>,
        #[arg(long)]
        max_nodes: Option<usize>,
        #[arg(long)]
        max_edges: Option<usize>,
    },
    /// Query expansion labels and ids
    Expand {
        term: Uuid,
        /// Comma-separated subset of self,variants,broader,narrower,related
        #[arg(long, value_delimiter = ',', default_value = "self,variants,narrower")]
        include: Vec<String>,
        #[arg(long)]
        depth: Option<usize>,
    },
    /// Relate two terms, e.g. `relate <A> broader <B>`
    Relate {
        term: Uuid,
        viewpoint: Viewpoint,
        target: Uuid,
    },
    /// Remove a relation touching a term
    Unrelate { term: Uuid, relation: Uuid },
    /// Merge one term into another
    Merge {
        source: Uuid,
        target: Uuid,
        /// Commit the merge; without it the merge is only previewed
        #[arg(long)]
        apply: bool,
        /// Leave the source term active
        #[arg(long)]
        keep_source: bool,
    },
    /// Data-quality report
    Report {
        report: ReportKind,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Write relations of a vocabulary as CSV
    Export {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load relations from CSV
    Import {
        file: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Commit the batch; without it the import is only previewed
        #[arg(long)]
        apply: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn tenant(cli_tenant: Option<Uuid>, config: &Config) -> Result<TenantId> {
    cli_tenant
        .or(config.thesaurus.default_tenant)
        .map(TenantId)
        .context("No tenant given: pass --tenant or set thesaurus.default_tenant")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.thesaurus.log_level.as_str()),
    )
    .init();

    let service = Thesaurus::from_config(&config);
    service
        .migrate(config.migrations_dir().to_path_buf())
        .await
        .context("Failed to apply migrations")?;

    let command = cli.command.unwrap_or(Command::Verify);
    if let Command::Verify = command {
        return verify_database_schema(service.db()).await;
    }
    let t = tenant(cli.tenant, &config)?;

    match command {
        Command::Verify => {}
        Command::Roots { scope, limit, cursor } => {
            print_json(&service.roots(t, scope.scope(), limit, cursor).await?)?;
        }
        Command::Children { term, limit, cursor } => {
            print_json(&service.children(t, term, limit, cursor).await?)?;
        }
        Command::Ancestors { term, depth, max_paths } => {
            print_json(&service.ancestors(t, term, depth, max_paths).await?)?;
        }
        Command::Graph { term, direction, depth, max_nodes, max_edges } => {
            print_json(&service.graph(t, term, direction, depth, max_nodes, max_edges).await?)?;
        }
        Command::Expand { term, include, depth } => {
            let include = ExpandInclude::parse(include.as_slice())?;
            print_json(&service.expand(t, term, include, depth).await?)?;
        }
        Command::Relate { term, viewpoint, target } => {
            print_json(&service.add_relation(t, term, viewpoint, target).await?)?;
        }
        Command::Unrelate { term, relation } => {
            print_json(&service.delete_relation(t, term, relation).await?)?;
        }
        Command::Merge { source, target, apply, keep_source } => {
            let mode = if apply { MergeMode::Apply } else { MergeMode::Preview };
            let options = MergeOptions { deactivate_source: !keep_source };
            print_json(&service.merge(t, source, target, mode, options).await?)?;
        }
        Command::Report { report, scope, limit, cursor } => {
            print_json(&service.report(t, scope.scope(), report, limit, cursor).await?)?;
        }
        Command::Export { scope, output } => {
            let csv = service.export_csv(t, scope.scope()).await?;
            match output {
                Some(path) => std::fs::write(&path, csv)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&csv)?;
                }
            }
        }
        Command::Import { file, scope, apply } => {
            let data = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let mode = if apply { ImportMode::Apply } else { ImportMode::Preview };
            let report = service.import_csv(t, scope.scope(), data, mode).await?;
            print_json(&report)?;
            if report.error_count > 0 {
                anyhow::bail!("{} row(s) failed validation", report.error_count);
            }
        }
    }

    Ok(())
}

/// Check that every expected table and index exists
async fn verify_database_schema(db: &Db) -> Result<()> {
    log::info!("Database path: {}", db.path().display());

    let missing = db
        .with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'index')")?;
            let names: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let expected = [
                "authority_terms",
                "authority_relations",
                "bib_term_links",
                "audit_events",
                "schema_migrations",
                "idx_terms_scope_label",
                "idx_relations_unique",
                "idx_relations_to",
            ];
            Ok(expected
                .iter()
                .filter(|name| !names.iter().any(|n| n == *name))
                .map(|name| name.to_string())
                .collect::<Vec<_>>())
        })
        .await?;

    if !missing.is_empty() {
        for name in &missing {
            log::error!("Missing schema object: {}", name);
        }
        anyhow::bail!("Schema incomplete: {} object(s) missing", missing.len());
    }

    log::info!("Schema verified");
    Ok(())
}
