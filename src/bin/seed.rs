//! Reproducible scale data: a layered polyhierarchy, related pairs and bib links.
//!
//! Ids are uuid5 over stable names, so re-running with the same arguments is a no-op.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use thesaurus::graph::{add_relation, Viewpoint};
use thesaurus::linkage::link_term;
use thesaurus::term::{create_term, find_term, NewTerm};
use thesaurus::{Config, TenantId, TermKind, Thesaurus, ThesaurusError};

#[derive(Parser)]
#[command(name = "seed", about = "Generate a deterministic thesaurus for load testing")]
struct Args {
    /// Tenant to seed; falls back to thesaurus.default_tenant
    #[arg(long)]
    tenant: Option<Uuid>,
    #[arg(long, default_value = "scale")]
    vocabulary: String,
    /// Number of subject terms
    #[arg(long, default_value_t = 2_000)]
    terms: usize,
    /// Narrower terms per parent in the layer above
    #[arg(long, default_value_t = 6)]
    fan_out: usize,
    /// Chance that a term gets a second broader term
    #[arg(long, default_value_t = 0.1)]
    extra_parent: f64,
    /// Number of related pairs
    #[arg(long, default_value_t = 500)]
    related: usize,
    /// Number of bibliographic records to link
    #[arg(long, default_value_t = 4_000)]
    bibs: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Everything to insert, decided up front so the rng sequence does not depend on the database
struct Plan {
    terms: Vec<(Uuid, String)>,
    broader: Vec<(usize, usize)>,
    related: Vec<(usize, usize)>,
    links: Vec<(Uuid, usize, i64)>,
}

fn stable_id(namespace: &Uuid, name: &str) -> Uuid {
    Uuid::new_v5(namespace, name.as_bytes())
}

/// Layer sizes grow by `fan_out` until `total` terms are placed
fn layer_sizes(total: usize, fan_out: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut placed = 0;
    let mut width = fan_out.max(1);
    while placed < total {
        let size = width.min(total - placed);
        sizes.push(size);
        placed += size;
        width = width.saturating_mul(fan_out.max(2));
    }
    sizes
}

fn plan(args: &Args, tenant: TenantId) -> Plan {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let namespace = stable_id(&Uuid::NAMESPACE_OID, &format!("thesaurus-seed:{}", tenant));

    let terms: Vec<(Uuid, String)> = (0..args.terms)
        .map(|i| {
            let label = format!("Subject {:06}", i);
            let id = stable_id(
                &namespace,
                &format!("{}:authority:subject:{}:{}", tenant, args.vocabulary, label),
            );
            (id, label)
        })
        .collect();

    // Edges only point from a layer to the one above it, so the result is acyclic
    let mut broader = Vec::new();
    let mut start = 0;
    let mut prev: Option<(usize, usize)> = None;
    for size in layer_sizes(args.terms, args.fan_out) {
        if let Some((prev_start, prev_len)) = prev {
            for offset in 0..size {
                let child = start + offset;
                let parent = prev_start + offset / args.fan_out.max(1) % prev_len;
                broader.push((child, parent));
                if prev_len > 1 && rng.gen_bool(args.extra_parent.clamp(0.0, 1.0)) {
                    let extra = prev_start + rng.gen_range(0..prev_len);
                    if extra != parent {
                        broader.push((child, extra));
                    }
                }
            }
        }
        prev = Some((start, size));
        start += size;
    }

    let mut related = Vec::new();
    if args.terms > 1 {
        for _ in 0..args.related {
            let a = rng.gen_range(0..args.terms);
            let b = rng.gen_range(0..args.terms);
            if a != b {
                related.push((a, b));
            }
        }
    }

    let mut links = Vec::new();
    if !terms.is_empty() {
        for i in 0..args.bibs {
            let bib = stable_id(&namespace, &format!("{}:bib:{:06}", tenant, i));
            let count = rng.gen_range(1..=3);
            for position in 0..count {
                links.push((bib, rng.gen_range(0..args.terms), position));
            }
        }
    }

    Plan { terms, broader, related, links }
}

#[derive(Debug, Default)]
struct SeedStats {
    terms_created: usize,
    relations_created: usize,
    relations_skipped: usize,
    links: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.thesaurus.log_level.as_str()),
    )
    .init();

    let tenant = args
        .tenant
        .or(config.thesaurus.default_tenant)
        .map(TenantId)
        .context("No tenant given: pass --tenant or set thesaurus.default_tenant")?;

    let service = Thesaurus::from_config(&config);
    service
        .migrate(config.migrations_dir().to_path_buf())
        .await
        .context("Failed to apply migrations")?;

    let plan = plan(&args, tenant);
    log::info!(
        "Seeding {}: {} terms, {} broader edges, {} related pairs, {} bib links",
        tenant,
        plan.terms.len(),
        plan.broader.len(),
        plan.related.len(),
        plan.links.len()
    );

    let vocabulary = args.vocabulary.clone();
    let stats = service
        .db()
        .with_transaction(move |tx| {
            let mut stats = SeedStats::default();

            for (id, label) in &plan.terms {
                if find_term(tx, tenant, *id)?.is_some() {
                    continue;
                }
                let mut new = NewTerm::new(TermKind::Subject, vocabulary.as_str(), label.as_str());
                new.id = Some(*id);
                new.source = Some("seed".to_string());
                create_term(tx, tenant, new)?;
                stats.terms_created += 1;
            }

            let edges = plan
                .broader
                .iter()
                .map(|&(a, b)| (a, Viewpoint::Broader, b))
                .chain(plan.related.iter().map(|&(a, b)| (a, Viewpoint::Related, b)));
            for (a, viewpoint, b) in edges {
                match add_relation(tx, tenant, plan.terms[a].0, viewpoint, plan.terms[b].0) {
                    Ok(_) => stats.relations_created += 1,
                    Err(ThesaurusError::DuplicateRelation { .. }) | Err(ThesaurusError::WouldCreateCycle { .. }) => {
                        stats.relations_skipped += 1
                    }
                    Err(e) => return Err(e),
                }
            }

            for &(bib, term, position) in &plan.links {
                link_term(tx, tenant, bib, plan.terms[term].0, position)?;
                stats.links += 1;
            }

            Ok(stats)
        })
        .await?;

    log::info!(
        "Seed done: {} terms created, {} relations created, {} skipped, {} links written",
        stats.terms_created,
        stats.relations_created,
        stats.relations_skipped,
        stats.links
    );
    Ok(())
}
