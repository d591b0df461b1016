mod config;
mod report;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::debug;

use survey_core::cache::{self, CacheKey};
use survey_core::planner::is_ignored;
use survey_core::{
    EmbeddingProvider, ModelOutput, Outcome, PlanOptions, Progress, Prompt, RequestLogStore,
    RunSummary, Runner, SurveyStore, WorkPlanner, HUMAN_MODEL,
};
use survey_provider::{parse_models, OpenAiEmbedder, OpenRouterClient};
use survey_store::SqliteStore;

use config::Config;
use report::SortBy;

#[derive(Parser)]
#[command(
    name = "llm-survey",
    version,
    about = "Send one prompt to many LLMs, judge and embed the answers, compare the models"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the outputs still missing for a prompt
    Run {
        /// Prompt id (default: [survey] default_prompt)
        #[arg(short, long)]
        prompt: Option<String>,

        /// Outputs wanted per model (default: [survey] count)
        #[arg(short, long)]
        count: Option<usize>,

        /// List the planned calls without making them
        #[arg(long)]
        dry_run: bool,

        /// Only models whose id contains this
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum calls to make
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Judge the outputs of a prompt that have no evaluation yet
    Evaluate {
        /// Prompt id
        prompt_id: String,

        /// List the planned calls without making them
        #[arg(long)]
        dry_run: bool,

        /// Maximum calls to make
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only outputs of models whose id contains this
        #[arg(short, long)]
        model: Option<String>,

        /// Judge model id (default: the prompt's, then [evaluation] model)
        #[arg(short, long)]
        evaluation_model: Option<String>,
    },

    /// Embed the outputs that have no embedding yet
    Embeddings {
        /// Embedding model id (default: [embedding] model)
        #[arg(long)]
        model: Option<String>,

        /// Only outputs of this prompt
        #[arg(short, long)]
        prompt: Option<String>,

        /// Only outputs of models whose id contains this
        #[arg(long)]
        model_filter: Option<String>,

        /// Maximum calls to make
        #[arg(short, long)]
        limit: Option<usize>,

        /// List the planned calls without making them
        #[arg(long)]
        dry_run: bool,
    },

    /// Model catalog
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// Manage prompts
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },

    /// Store a human-written reference answer read from stdin
    Reference {
        /// Prompt id
        prompt_id: String,
    },

    /// Rank the models that answered a prompt
    Report {
        /// Prompt id
        prompt_id: String,

        /// Embedding model id (default: [embedding] model)
        #[arg(long)]
        embedding_model: Option<String>,

        /// Judge whose scores are used (default: the prompt's, then [evaluation] model)
        #[arg(short, long)]
        evaluation_model: Option<String>,

        /// Show the consistency grid of one model instead
        #[arg(short, long)]
        model: Option<String>,

        /// Ranking order
        #[arg(short, long, value_enum, default_value_t = SortBy::Score)]
        sort: SortBy,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show row counts
    Stats,

    /// Show the resolved configuration
    Config,
}

#[derive(Subcommand)]
enum ModelsAction {
    /// Download the OpenRouter catalog and upsert every model
    Fetch,
    /// List the models in the catalog
    List,
}

#[derive(Subcommand)]
enum PromptsAction {
    /// Create or replace a prompt; the text is read from stdin
    Add {
        /// Prompt id
        id: String,

        /// Store stdin as the marking scheme instead of the prompt text
        #[arg(long)]
        marking_scheme: bool,

        /// Judge model for this prompt
        #[arg(short, long)]
        evaluation_model: Option<String>,
    },
    /// Print a prompt's text
    Get {
        /// Prompt id
        id: String,

        /// Print the marking scheme instead
        #[arg(long)]
        marking_scheme: bool,
    },
    /// List prompts
    List,
    /// Upsert prompts from JSON on stdin (one object or an array)
    Import,
    /// Print a prompt as JSON
    Export {
        /// Prompt id
        id: String,
    },
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "llm-survey", "llm-survey")
        .map(|dirs| dirs.data_dir().join("survey.db"))
        .unwrap_or_else(|| PathBuf::from("survey.db"))
}

fn open_store(db: Option<&Path>, cfg: &Config) -> Result<SqliteStore> {
    let path = db
        .map(Path::to_path_buf)
        .or_else(|| cfg.store.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_db_path);
    debug!(path = %path.display(), "opening database");
    SqliteStore::new(&path).context("failed to open database")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { db, command } = Cli::parse();
    let cfg = config::load_config()?;
    let store = || open_store(db.as_deref(), &cfg);

    match command {
        Commands::Run {
            prompt,
            count,
            dry_run,
            model,
            limit,
        } => {
            let prompt_id = prompt.unwrap_or_else(|| cfg.survey.default_prompt.clone());
            let count = count.unwrap_or(cfg.survey.count);
            let options = PlanOptions {
                model_contains: model,
                limit,
            };
            cmd_run(&store()?, &cfg, &prompt_id, count, dry_run, &options)
        }
        Commands::Evaluate {
            prompt_id,
            dry_run,
            limit,
            model,
            evaluation_model,
        } => {
            let options = PlanOptions {
                model_contains: model,
                limit,
            };
            cmd_evaluate(
                &store()?,
                &cfg,
                &prompt_id,
                evaluation_model.as_deref(),
                dry_run,
                &options,
            )
        }
        Commands::Embeddings {
            model,
            prompt,
            model_filter,
            limit,
            dry_run,
        } => {
            let model = model.unwrap_or_else(|| cfg.embedding.model.clone());
            let options = PlanOptions {
                model_contains: model_filter,
                limit,
            };
            cmd_embeddings(&store()?, &cfg, &model, prompt.as_deref(), dry_run, &options)
        }
        Commands::Models { action } => match action {
            ModelsAction::Fetch => cmd_models_fetch(&store()?, &cfg),
            ModelsAction::List => cmd_models_list(&store()?),
        },
        Commands::Prompts { action } => match action {
            PromptsAction::Add {
                id,
                marking_scheme,
                evaluation_model,
            } => cmd_prompts_add(&store()?, &id, marking_scheme, evaluation_model),
            PromptsAction::Get { id, marking_scheme } => {
                cmd_prompts_get(&store()?, &id, marking_scheme)
            }
            PromptsAction::List => cmd_prompts_list(&store()?),
            PromptsAction::Import => cmd_prompts_import(&store()?),
            PromptsAction::Export { id } => cmd_prompts_export(&store()?, &id),
        },
        Commands::Reference { prompt_id } => cmd_reference(&store()?, &prompt_id),
        Commands::Report {
            prompt_id,
            embedding_model,
            evaluation_model,
            model,
            sort,
            json,
        } => {
            let embedding_model = embedding_model.unwrap_or_else(|| cfg.embedding.model.clone());
            cmd_report(
                &store()?,
                &cfg,
                &prompt_id,
                &embedding_model,
                evaluation_model.as_deref(),
                model.as_deref(),
                sort,
                json,
            )
        }
        Commands::Stats => cmd_stats(&store()?),
        Commands::Config => cmd_config(&cfg),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_stdin() -> Result<String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("reading stdin")?;
    let text = text.trim().to_string();
    if text.is_empty() {
        bail!("nothing on stdin");
    }
    Ok(text)
}

fn require_prompt(store: &SqliteStore, id: &str) -> Result<Prompt> {
    store
        .get_prompt(id)?
        .with_context(|| format!("prompt {id} not found (add it with `llm-survey prompts add {id}`)"))
}

fn openrouter(cfg: &Config) -> Result<OpenRouterClient> {
    OpenRouterClient::with_config(
        &cfg.providers.openrouter_base_url,
        cfg.providers.timeout(),
    )
    .context("cannot create OpenRouter client")
}

#[cfg(feature = "local-embeddings")]
fn embedder(cfg: &Config, model: &str) -> Result<Box<dyn EmbeddingProvider>> {
    if model == survey_core::LOCAL_EMBEDDING_MODEL {
        return Ok(Box::new(survey_core::LocalEmbedder::new()));
    }
    openai_embedder(cfg)
}

#[cfg(not(feature = "local-embeddings"))]
fn embedder(cfg: &Config, _model: &str) -> Result<Box<dyn EmbeddingProvider>> {
    openai_embedder(cfg)
}

fn openai_embedder(cfg: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    let embedder =
        OpenAiEmbedder::with_config(&cfg.providers.openai_base_url, cfg.providers.timeout())
            .context("cannot create OpenAI client")?;
    Ok(Box::new(embedder))
}

fn print_progress(p: &Progress<'_>) {
    let outcome = match p.outcome {
        Outcome::Fresh => "ok",
        Outcome::Reused => "cached",
        Outcome::Failed => "FAILED",
    };
    match &p.error {
        Some(error) => eprintln!("[{}/{}] {} {outcome}: {error}", p.index, p.total, p.model),
        None => eprintln!("[{}/{}] {} {outcome}", p.index, p.total, p.model),
    }
}

fn print_summary(what: &str, summary: &RunSummary) {
    println!(
        "{what}: {} done ({} new, {} from cache), {} failed.",
        summary.completed(),
        summary.fresh,
        summary.reused,
        summary.failures.len()
    );
    if !summary.is_clean() {
        for failure in &summary.failures {
            println!("  {} [{}]: {}", failure.model, failure.subject, failure.error);
        }
        println!("Run the same command again to retry the failed tasks.");
    }
}

// ---------------------------------------------------------------------------
// Survey commands
// ---------------------------------------------------------------------------

fn cmd_run(
    store: &SqliteStore,
    cfg: &Config,
    prompt_id: &str,
    count: usize,
    dry_run: bool,
    options: &PlanOptions,
) -> Result<()> {
    let prompt = require_prompt(store, prompt_id)?;
    if store.list_models()?.is_empty() {
        bail!("the model catalog is empty (run `llm-survey models fetch` first)");
    }

    let tasks = WorkPlanner::new(store).generation(&prompt, count, options)?;
    if tasks.is_empty() {
        println!("Nothing to do: every model has {count} outputs for {prompt_id}.");
        return Ok(());
    }

    if dry_run {
        for task in &tasks {
            println!("  [dry-run] {} sample {}", task.model.id, task.sample);
        }
        println!("Would request {} generations.", tasks.len());
        return Ok(());
    }

    let client = openrouter(cfg)?;
    println!("Requesting {} generations for {prompt_id}...", tasks.len());
    let summary = Runner::new(store)
        .with_progress(&print_progress)
        .generate(&prompt, &tasks, &client)?;
    print_summary("Generations", &summary);
    Ok(())
}

fn cmd_evaluate(
    store: &SqliteStore,
    cfg: &Config,
    prompt_id: &str,
    evaluation_model: Option<&str>,
    dry_run: bool,
    options: &PlanOptions,
) -> Result<()> {
    let prompt = require_prompt(store, prompt_id)?;
    let planner = WorkPlanner::new(store);
    let evaluator = planner.evaluator(&prompt, evaluation_model, cfg.evaluation.model.as_deref())?;
    let template = cfg.evaluation.template()?;

    let outputs = planner.evaluation(prompt_id, &evaluator.id, options)?;
    if outputs.is_empty() {
        println!("Nothing to do: every output of {prompt_id} is judged by {}.", evaluator.id);
        return Ok(());
    }

    if dry_run {
        for output in &outputs {
            println!("  [dry-run] {} {}", output.model, output.id);
        }
        println!("Would request {} evaluations from {}.", outputs.len(), evaluator.id);
        return Ok(());
    }

    let client = openrouter(cfg)?;
    println!("Requesting {} evaluations from {}...", outputs.len(), evaluator.id);
    let summary = Runner::new(store)
        .with_progress(&print_progress)
        .evaluate(&prompt, &evaluator, &template, &outputs, &client)?;
    print_summary("Evaluations", &summary);
    Ok(())
}

fn cmd_embeddings(
    store: &SqliteStore,
    cfg: &Config,
    model: &str,
    prompt_id: Option<&str>,
    dry_run: bool,
    options: &PlanOptions,
) -> Result<()> {
    let outputs = WorkPlanner::new(store).embedding(model, prompt_id, options)?;
    if outputs.is_empty() {
        println!("All outputs already have {model} embeddings.");
        return Ok(());
    }

    if dry_run {
        for output in &outputs {
            println!("  [dry-run] {} {} {}", output.prompt_id, output.model, output.id);
        }
        println!("Would request {} embeddings from {model}.", outputs.len());
        return Ok(());
    }

    let provider = embedder(cfg, model)?;
    println!("Requesting {} embeddings from {model}...", outputs.len());
    let summary = Runner::new(store)
        .with_progress(&print_progress)
        .embed(model, &outputs, provider.as_ref())?;
    print_summary("Embeddings", &summary);
    Ok(())
}

// ---------------------------------------------------------------------------
// Catalog and prompt commands
// ---------------------------------------------------------------------------

fn cmd_models_fetch(store: &SqliteStore, cfg: &Config) -> Result<()> {
    let client = openrouter(cfg)?;
    let catalog = client.fetch_catalog().context("fetching model catalog")?;

    // Always refetched, but kept in the log like every other paid-for answer.
    let key = CacheKey::new(cache::MODELS, &serde_json::json!({ "endpoint": "models" }))?;
    store.log_request(&key.resource, &key.request, &catalog)?;

    let mut added = 0;
    let mut skipped = 0;
    for model in parse_models(&catalog)? {
        if is_ignored(&model.id) {
            skipped += 1;
            continue;
        }
        store.upsert_model(&model)?;
        added += 1;
    }
    println!("Upserted {added} models ({skipped} ignored).");
    Ok(())
}

fn cmd_models_list(store: &SqliteStore) -> Result<()> {
    let models = store.list_models()?;
    if models.is_empty() {
        println!("No models yet (run `llm-survey models fetch`).");
        return Ok(());
    }

    println!("{:<50} {:>10} {:>14} {:>14}", "Model", "Context", "$/M prompt", "$/M completion");
    println!("{}", "-".repeat(91));
    for m in &models {
        println!(
            "{:<50} {:>10} {:>14.3} {:>14.3}",
            m.id,
            m.context_length.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            m.pricing.prompt * 1_000_000.0,
            m.pricing.completion * 1_000_000.0,
        );
    }
    Ok(())
}

fn cmd_prompts_add(
    store: &SqliteStore,
    id: &str,
    marking_scheme: bool,
    evaluation_model: Option<String>,
) -> Result<()> {
    let text = read_stdin()?;
    let existing = store.get_prompt(id)?;

    let mut prompt = if marking_scheme {
        existing.with_context(|| format!("prompt {id} not found (add its text first)"))?
    } else {
        existing.unwrap_or_else(|| Prompt::new(id, ""))
    };

    if marking_scheme {
        prompt.marking_scheme = text;
    } else {
        prompt.prompt = text;
    }
    if evaluation_model.is_some() {
        prompt.evaluation_model = evaluation_model;
    }

    store.save_prompt(&prompt)?;
    println!("Saved prompt {id}.");
    Ok(())
}

fn cmd_prompts_get(store: &SqliteStore, id: &str, marking_scheme: bool) -> Result<()> {
    let prompt = require_prompt(store, id)?;
    if marking_scheme {
        println!("{}", prompt.marking_scheme);
    } else {
        println!("{}", prompt.prompt);
    }
    Ok(())
}

fn cmd_prompts_list(store: &SqliteStore) -> Result<()> {
    let prompts = store.list_prompts()?;
    if prompts.is_empty() {
        println!("No prompts yet.");
        return Ok(());
    }

    println!("{:<20} {:<7} {:<30} Prompt", "Id", "Scheme", "Judge");
    println!("{}", "-".repeat(100));
    for p in &prompts {
        println!(
            "{:<20} {:<7} {:<30} {}",
            p.id,
            if p.marking_scheme.is_empty() { "no" } else { "yes" },
            p.evaluation_model.as_deref().unwrap_or("-"),
            report::truncate(p.prompt.lines().next().unwrap_or(""), 40)
        );
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PromptImport {
    Many(Vec<Prompt>),
    One(Prompt),
}

fn cmd_prompts_import(store: &SqliteStore) -> Result<()> {
    let text = read_stdin()?;
    let prompts = match serde_json::from_str(&text).context("parsing prompts JSON")? {
        PromptImport::Many(prompts) => prompts,
        PromptImport::One(prompt) => vec![prompt],
    };
    for prompt in &prompts {
        if prompt.id.trim().is_empty() {
            bail!("every imported prompt needs an id");
        }
        store.save_prompt(prompt)?;
    }
    println!("Imported {} prompts.", prompts.len());
    Ok(())
}

fn cmd_prompts_export(store: &SqliteStore, id: &str) -> Result<()> {
    let prompt = require_prompt(store, id)?;
    println!("{}", serde_json::to_string_pretty(&prompt)?);
    Ok(())
}

fn cmd_reference(store: &SqliteStore, prompt_id: &str) -> Result<()> {
    require_prompt(store, prompt_id)?;
    let text = read_stdin()?;
    let id = store.insert_output(ModelOutput::new(prompt_id, HUMAN_MODEL, text))?;
    println!("Stored reference answer {id} for {prompt_id}.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn cmd_report(
    store: &SqliteStore,
    cfg: &Config,
    prompt_id: &str,
    embedding_model: &str,
    evaluation_model: Option<&str>,
    model: Option<&str>,
    sort: SortBy,
    json: bool,
) -> Result<()> {
    let prompt = require_prompt(store, prompt_id)?;

    if let Some(model) = model {
        let detail = report::build_model_detail(store, prompt_id, embedding_model, model)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&detail)?);
        } else {
            print!("{}", report::render_model_detail(&detail));
        }
        return Ok(());
    }

    let evaluation_model = evaluation_model
        .or(prompt.evaluation_model.as_deref())
        .or(cfg.evaluation.model.as_deref());
    let report = report::build_report(
        store,
        prompt_id,
        embedding_model,
        evaluation_model,
        &cfg.report.reference_model,
        sort,
    )?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report::render_report(&report));
    }
    Ok(())
}

fn cmd_stats(store: &SqliteStore) -> Result<()> {
    let stats = store.stats()?;
    println!("Models:      {}", stats.models);
    println!("Prompts:     {}", stats.prompts);
    println!("Outputs:     {}", stats.outputs);
    println!("Embeddings:  {}", stats.embeddings);
    println!("Evaluations: {}", stats.evaluations);
    println!("Requests:    {}", stats.requests);

    let judges = store.evaluation_models()?;
    if !judges.is_empty() {
        println!("Judges:      {}", judges.join(", "));
    }
    Ok(())
}

fn cmd_config(cfg: &Config) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    println!();
    println!("[store]");
    println!(
        "  path = {}",
        cfg.store
            .path
            .clone()
            .unwrap_or_else(|| format!("{} (default)", default_db_path().display()))
    );
    println!();
    println!("[survey]");
    println!("  default_prompt = {}", cfg.survey.default_prompt);
    println!("  count = {}", cfg.survey.count);
    println!();
    println!("[embedding]");
    println!("  model = {}", cfg.embedding.model);
    println!();
    println!("[evaluation]");
    println!(
        "  model = {}",
        cfg.evaluation.model.as_deref().unwrap_or("(none)")
    );
    println!(
        "  template = {}",
        if cfg.evaluation.template.is_some() { "(custom)" } else { "(default)" }
    );
    println!();
    println!("[report]");
    println!("  reference_model = {}", cfg.report.reference_model);
    println!();
    println!("[providers]");
    println!("  openrouter_base_url = {}", cfg.providers.openrouter_base_url);
    println!("  openai_base_url = {}", cfg.providers.openai_base_url);
    println!("  timeout_secs = {}", cfg.providers.timeout_secs);
    Ok(())
}
