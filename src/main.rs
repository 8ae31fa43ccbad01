//! collpack - build and publish mod collections
//!
//! Turns an installed mod setup into a portable collection archive and back.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use collpack::collection::assembler::{calculate_collection_size, make_collection_id};
use collpack::collection::host::CloneChoice;
use collpack::collection::remote::{HttpMetaLookup, HttpUploader};
use collpack::collection::types::{MANIFEST_FILE, PATCHES_PATH};
use collpack::collection::{
    load_manifest, load_manifest_from_archive, Assembler, CancelToken, Identity, Manifest,
    ModStore, Prompter, ProgressFn, ProgressUpdate, Services,
};
use collpack::config::{ArchiveFormat, ExportConfig, Settings};
use collpack::error::{CollectionError, PackagingError};
use collpack::patch::{apply_patches, PatchDecision, PatchMetrics};
use collpack::paths::sanitize_filename;

#[derive(Parser)]
#[command(name = "collpack")]
#[command(version)]
#[command(about = "Build, export and share mod collections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

/// Where the game's mods and archives live
#[derive(Args)]
struct GameArgs {
    /// Game id (e.g. skyrimse)
    #[arg(short, long)]
    game: String,

    /// Staging directory holding installed mods (default from settings)
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Directory holding the original archives (default from settings)
    #[arg(long)]
    downloads: Option<PathBuf>,

    /// Mods packaged in parallel (default from settings)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Answer every question with its default instead of asking
    #[arg(short = 'y', long)]
    yes: bool,

    /// API key for the metadata and collection services
    #[arg(long, env = "COLLPACK_META_KEY", hide_env_values = true)]
    meta_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a collection into a single archive
    Export {
        #[command(flatten)]
        game: GameArgs,

        /// Local id of the collection
        collection: String,

        /// Output directory (default: <collection folder>/export)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Installed game version, recorded in the manifest
        #[arg(long)]
        game_version: Option<String>,

        /// Write a .zip instead of a .7z
        #[arg(long)]
        zip: bool,
    },

    /// Show information about a collection.json or an exported archive
    Info {
        /// Path to collection.json or a collection archive
        path: PathBuf,
    },

    /// Install a collection manifest or archive as a local collection
    Import {
        #[command(flatten)]
        game: GameArgs,

        /// Path to collection.json or a collection archive
        path: PathBuf,

        /// Local id of the new collection (default: derived from the file name)
        #[arg(long)]
        id: Option<String>,
    },

    /// Duplicate a collection under a new id
    Clone {
        #[command(flatten)]
        game: GameArgs,

        /// Local id of the collection to copy
        source: String,

        /// Local id of the copy
        target: String,
    },

    /// Refresh a collection's rules from the current install
    Update {
        #[command(flatten)]
        game: GameArgs,

        /// Local id of the collection
        collection: String,
    },

    /// Export a collection and submit it to the collection service
    Upload {
        #[command(flatten)]
        game: GameArgs,

        /// Local id of the collection
        collection: String,

        #[arg(long)]
        game_version: Option<String>,
    },

    /// Apply the stored patches of one mod of an extracted collection
    ApplyPatches {
        /// Extracted collection folder (holding collection.json)
        collection_dir: PathBuf,

        /// Name of the mod as listed in the manifest
        mod_name: String,

        /// Installed mod folder to patch
        target: PathBuf,
    },

    /// Create or update a collection from the mods enabled in a profile
    CreateFromProfile {
        #[command(flatten)]
        game: GameArgs,

        /// Profile id
        profile: String,

        /// Create a quick collection with this name instead
        #[arg(long)]
        quick: Option<String>,
    },
}

/// Asks on stdin, or answers with defaults when `assume_yes` is set
struct StdinPrompter {
    assume_yes: bool,
}

impl StdinPrompter {
    fn ask(&self, question: &str, default: bool) -> bool {
        if self.assume_yes {
            return default;
        }
        print!("{} [{}] ", question, if default { "Y/n" } else { "y/N" });
        if std::io::stdout().flush().is_err() {
            return default;
        }
        let mut input = String::new();
        if std::io::stdin().read_line(&mut input).is_err() {
            return default;
        }
        match input.trim().to_lowercase().as_str() {
            "" => default,
            answer => answer == "y" || answer == "yes",
        }
    }
}

impl Prompter for StdinPrompter {
    fn patch_too_large(&self, file: &str, metrics: &PatchMetrics) -> PatchDecision {
        println!(
            "\nThe patch for {} would be {} bytes ({} bytes modified).",
            file, metrics.patch_size, metrics.modified_size
        );
        if self.ask("Skip saving edits of this file?", true) {
            PatchDecision::Skip
        } else {
            PatchDecision::Abort
        }
    }

    fn continue_despite_errors(&self, errors: &[PackagingError]) -> bool {
        println!("\n=== Problems ===");
        for e in errors {
            println!("  {}", e);
        }
        if self.assume_yes {
            return true;
        }
        self.ask("Continue anyway?", false)
    }

    fn clone_or_contribute(&self, collection_name: &str) -> CloneChoice {
        println!(
            "\nYou may edit \"{}\" but you're not its owner.",
            collection_name
        );
        if self.ask("Contribute to the original instead of creating a new collection?", false) {
            CloneChoice::Contribute
        } else {
            CloneChoice::Clone
        }
    }
}

fn progress_bar() -> (ProgressBar, ProgressFn) {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    let bar = pb.clone();
    let on_progress: ProgressFn = Arc::new(move |update: ProgressUpdate| {
        bar.set_position(u64::from(update.percent));
        bar.set_message(update.text);
    });
    (pb, on_progress)
}

/// Settings, store and a configured assembler for one game
struct Session {
    settings: Settings,
    store: ModStore,
    assembler: Assembler,
    meta_key: Option<String>,
}

impl Session {
    fn open(args: GameArgs, tweak: impl FnOnce(&mut ExportConfig)) -> Result<Self> {
        let settings = Settings::load();

        let staging = args
            .staging
            .or_else(|| non_empty(&settings.default_staging_dir).map(PathBuf::from))
            .context("No staging directory (--staging or default_staging_dir in settings)")?;
        let downloads = args
            .downloads
            .or_else(|| non_empty(&settings.default_downloads_dir).map(PathBuf::from))
            .context("No downloads directory (--downloads or default_downloads_dir in settings)")?;

        let mut config = ExportConfig::new(&args.game, staging, downloads);
        config.concurrency = args.concurrency.unwrap_or(settings.concurrency);
        config.assume_yes = args.yes;
        tweak(&mut config);
        config.validate()?;

        let meta_key = args
            .meta_key
            .or_else(|| non_empty(&settings.meta_api_key).map(str::to_string));

        let mut services = Services::local(args.yes).with_prompter(Arc::new(StdinPrompter {
            assume_yes: args.yes,
        }));
        if let Some(server) = non_empty(&settings.meta_server_url) {
            services = services.with_meta(Arc::new(HttpMetaLookup::new(server, meta_key.as_deref())?));
        }

        let db_path = settings.db_path()?;
        let store = ModStore::open(&db_path)
            .with_context(|| format!("Failed to open state database {}", db_path.display()))?;
        let assembler = Assembler::new(config, services, Identity::from_settings(&settings));

        Ok(Self {
            settings,
            store,
            assembler,
            meta_key,
        })
    }

    /// Attach a progress bar and stop after the current phase on Ctrl-C
    fn with_progress(mut self) -> (Self, ProgressBar) {
        let (pb, on_progress) = progress_bar();
        self.assembler = self
            .assembler
            .with_progress(on_progress)
            .with_cancel_token(cancel_on_ctrl_c(pb.clone()));
        (self, pb)
    }
}

fn cancel_on_ctrl_c(pb: ProgressBar) -> CancelToken {
    let token = CancelToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            pb.set_message("Canceling after the current step...");
            on_signal.cancel();
        }
        // a second Ctrl-C doesn't wait
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    token
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn print_manifest(manifest: &Manifest) {
    println!("=== Collection Information ===");
    println!("Name:        {}", manifest.info.name);
    println!("Author:      {}", manifest.info.author);
    println!("Domain:      {}", manifest.info.domain_name);
    if !manifest.info.game_versions.is_empty() {
        println!("Game:        {}", manifest.info.game_versions.join(", "));
    }
    println!();
    println!("Mods:        {}", manifest.mod_count());
    println!("Mod Rules:   {}", manifest.mod_rules.len());
    println!("Plugins:     {}", manifest.plugins().len());

    let mut source_counts = std::collections::BTreeMap::new();
    for m in &manifest.mods {
        *source_counts.entry(m.source.source_type.as_str()).or_insert(0) += 1;
    }
    if !source_counts.is_empty() {
        println!("\n=== Sources ===");
        let mut counts: Vec<_> = source_counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        for (source, count) in counts {
            println!("{:>8}  {}", count, source);
        }
    }

    let optional_count = manifest.mods.iter().filter(|m| m.optional).count();
    if optional_count > 0 {
        println!("\nOptional:    {} mods", optional_count);
    }
    let patched = manifest.mods.iter().filter(|m| m.patches.is_some()).count();
    if patched > 0 {
        println!("Patched:     {} mods", patched);
    }

    let total_size: u64 = manifest.mods.iter().filter_map(|m| m.source.file_size).sum();
    println!("\nTotal size:  {:.2} GB", total_size as f64 / 1024.0 / 1024.0 / 1024.0);
}

fn init_logging(cli: &Cli) -> Result<()> {
    // Only initialize logging if verbose or RUST_LOG is set
    if !cli.verbose && std::env::var("RUST_LOG").is_err() {
        return Ok(());
    }
    let filter = EnvFilter::from_default_env().add_directive(if cli.verbose {
        "collpack=debug".parse()?
    } else {
        "collpack=warn".parse()?
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match run(cli.command).await {
        Err(e)
            if e
                .downcast_ref::<CollectionError>()
                .is_some_and(CollectionError::is_user_canceled) =>
        {
            println!("\nCanceled.");
            Ok(())
        }
        other => other,
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Export {
            game,
            collection,
            output,
            game_version,
            zip,
        } => {
            let session = Session::open(game, |config| {
                config.export_dir = output;
                config.game_version = game_version;
                if zip {
                    config.archive_format = ArchiveFormat::Zip;
                }
            })?;
            let (mut session, pb) = session.with_progress();

            let outcome = session.assembler.export(&session.store, &collection).await;
            pb.finish_and_clear();
            let outcome = outcome?;

            println!("=== Export Summary ===");
            println!("Mods:        {}", outcome.manifest.mod_count());
            println!("Mod Rules:   {}", outcome.manifest.mod_rules.len());
            if !outcome.errors.is_empty() {
                println!("Skipped:     {} (see above)", outcome.errors.len());
            }
            for d in &outcome.diagnostics {
                println!("  note: {}: {}", d.mod_name, d.summary());
            }
            println!("\nCollection written to {}", outcome.archive_path.display());
        }

        Commands::Info { path } => {
            println!("Parsing {}...\n", path.display());
            let is_manifest = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("json"));
            let manifest = if is_manifest {
                load_manifest(&path)?
            } else {
                load_manifest_from_archive(&path)?
            };
            print_manifest(&manifest);
        }

        Commands::Import { game, path, id } => {
            let mut session = Session::open(game, |_| {})?;
            let id = match id {
                Some(id) => id,
                None => make_collection_id(&sanitize_filename(
                    &path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "imported".to_string()),
                )),
            };

            let outcome = session
                .assembler
                .import_collection(&mut session.store, &path, &id)?;
            let table = session.store.load_game(&session.assembler.config().game_id)?;

            println!("Imported \"{}\" as {}", outcome.container.display_name(), id);
            println!("Members:     {}", outcome.container.rules.len());
            println!(
                "Download:    {:.2} GB",
                calculate_collection_size(&outcome.container, &table) as f64 / 1024.0 / 1024.0 / 1024.0
            );
            let unresolved = outcome.mod_rules.iter().filter(|r| !r.is_resolved()).count();
            if unresolved > 0 {
                println!("Mod rules:   {} waiting for mods to be installed", unresolved);
            }
            for e in &outcome.errors {
                println!("  skipped: {}", e);
            }
        }

        Commands::Clone { game, source, target } => {
            let session = Session::open(game, |_| {})?;
            let clone = session
                .assembler
                .clone_collection(&session.store, &source, &target)?;
            println!("Cloned into \"{}\" ({})", clone.display_name(), target);
        }

        Commands::Update { game, collection } => {
            let session = Session::open(game, |_| {})?;
            let (mut session, pb) = session.with_progress();
            let outcome = session.assembler.update(&mut session.store, &collection).await;
            pb.finish_and_clear();
            let outcome = outcome?;
            println!(
                "Updated {}: {} rule(s) removed, {} added",
                collection,
                outcome.removed.len(),
                outcome.added.len()
            );
        }

        Commands::Upload {
            game,
            collection,
            game_version,
        } => {
            let session = Session::open(game, |config| config.game_version = game_version)?;
            let server = non_empty(&session.settings.meta_server_url)
                .map(str::to_string)
                .context("No collection service configured (meta_server_url in settings)")?;
            let uploader = Arc::new(HttpUploader::new(&server, session.meta_key.as_deref())?);

            let (mut session, pb) = session.with_progress();
            let result = session
                .assembler
                .upload(&mut session.store, &collection, uploader)
                .await;
            pb.finish_and_clear();
            let result = match result {
                Err(CollectionError::Rejected { message, details }) => {
                    println!("The collection was rejected: {}", message);
                    for d in &details {
                        println!("  - {}", d);
                    }
                    bail!("upload rejected");
                }
                other => other?,
            };
            println!(
                "Uploaded {} (revision {})",
                result.collection_slug,
                result
                    .revision_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        }

        Commands::ApplyPatches {
            collection_dir,
            mod_name,
            target,
        } => {
            apply_mod_patches(&collection_dir, &mod_name, &target)?;
        }

        Commands::CreateFromProfile {
            game,
            profile,
            quick,
        } => {
            let mut session = Session::open(game, |_| {})?;
            let created = session.assembler.create_from_profile(
                &mut session.store,
                &profile,
                quick.as_deref(),
            )?;
            if created.updated {
                println!("Updated \"{}\" ({})", created.name, created.id);
            } else {
                println!("Created \"{}\" ({})", created.name, created.id);
            }
        }
    }

    Ok(())
}

fn apply_mod_patches(collection_dir: &Path, mod_name: &str, target: &Path) -> Result<()> {
    let manifest = load_manifest(&collection_dir.join(MANIFEST_FILE))?;
    let Some(entry) = manifest.mods.iter().find(|m| m.name == mod_name) else {
        bail!("\"{}\" is not part of {}", mod_name, manifest.info.name);
    };
    let Some(patches) = &entry.patches else {
        println!("\"{}\" has no patches", mod_name);
        return Ok(());
    };

    let patches_dir = collection_dir
        .join(PATCHES_PATH)
        .join(sanitize_filename(mod_name));
    let report = apply_patches(target, &patches_dir, patches);

    println!("Applied:     {}", report.applied.len());
    if !report.skipped.is_empty() {
        println!("Skipped:     {} (file differs from the original)", report.skipped.len());
    }
    for (file, e) in &report.failed {
        println!("  failed: {}: {}", file, e);
    }
    if !report.failed.is_empty() {
        bail!("{} patch(es) failed", report.failed.len());
    }
    Ok(())
}
