use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kurbo::{Point, Rect};
use meme_studio::{
    catalog::{Catalog, Template},
    client::{ApiClient, MemeApi},
    composer::{Color, Composer, ComposerOptions, DefaultImageSource},
    export::encode_png,
    feed::FeedStore,
    imagedata,
    local_store::LocalMemeStore,
    models::{CreateMemeRequest, MemeRecord, VoteKind},
    session::{Session, SessionConfig},
    startup::init_tracing,
};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "meme-cli", version, about = "Compose, publish and browse memes")]
struct Cli {
    /// Base URL of the meme API, including the `/api` prefix.
    #[arg(long, env = "MEME_API_URL", default_value = "http://localhost:5000/api", global = true)]
    api_url: String,

    /// Firebase ID token used as the bearer token.
    #[arg(long, env = "MEME_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// JSON file holding memes saved on this machine.
    #[arg(long, env = "MEME_LOCAL_STORE", default_value = "saved_memes.json", global = true)]
    local_store: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in templates.
    Templates,
    /// Render a meme to a PNG file.
    Compose(ComposeArgs),
    /// Render a meme and post it to the gallery.
    Publish(PublishArgs),
    /// Show the gallery, newest first, up to `--page`.
    Gallery(GalleryArgs),
    /// Show one meme.
    Show { id: Uuid },
    /// Vote on a meme. Voting the same way twice clears the vote.
    Vote { id: Uuid, direction: Direction },
    /// Comment on a meme.
    Comment { id: Uuid, text: String },
    /// Delete a meme (author or admin).
    Delete {
        id: Uuid,
        /// Use the admin endpoint.
        #[arg(long)]
        admin: bool,
    },
    /// Show admin statistics.
    Stats,
    /// Check that the server is up.
    Health,
}

#[derive(Args, Debug)]
struct ComposeArgs {
    /// Built-in template id or name.
    #[arg(long, conflicts_with = "image", required_unless_present = "image")]
    template: Option<String>,

    /// Custom template image: a file path, http(s) URL or data URL.
    #[arg(long)]
    image: Option<String>,

    /// Caption text, one per field in order. Repeat for more fields.
    #[arg(long = "caption")]
    captions: Vec<String>,

    /// Caption position as `x,y` percentages, matched to captions in order.
    #[arg(long = "position", value_parser = parse_position)]
    positions: Vec<Point>,

    /// Caption color as #rgb or #rrggbb.
    #[arg(long, default_value = "#FFFFFF")]
    color: Color,

    /// Multiplier applied to caption size on export.
    #[arg(long, default_value_t = 1.0)]
    font_scale: f64,

    /// Output PNG path.
    #[arg(long, default_value = "meme.png")]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[command(flatten)]
    compose: ComposeArgs,

    /// Meme name. Defaults to the first caption.
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct GalleryArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Only memes by this author uid.
    #[arg(long)]
    author: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Up,
    Down,
}

impl From<Direction> for VoteKind {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Up => VoteKind::Upvote,
            Direction::Down => VoteKind::Downvote,
        }
    }
}

fn parse_position(raw: &str) -> Result<Point, String> {
    let (x, y) = raw.split_once(',').ok_or("expected `x,y`")?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|e| format!("'{v}': {e}"));
    Ok(Point::new(parse(x)?, parse(y)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("meme_studio=info");

    let cli = Cli::parse();

    let mut session = Session::init(SessionConfig::default());
    if let Some(token) = cli.token.clone() {
        let identity = session.sign_in(token).await.context("decode --token")?;
        tracing::debug!(uid = %identity.uid, "Using caller identity");
    }
    let api = ApiClient::new(&cli.api_url)?;
    api.set_token(session.token().await).await;
    let api = Arc::new(api);
    let local = LocalMemeStore::new(&cli.local_store);

    let result = run(cli.cmd, api, local, &session).await;
    session.teardown();
    result
}

async fn run(cmd: Command, api: Arc<ApiClient>, local: LocalMemeStore, session: &Session) -> anyhow::Result<()> {
    match cmd {
        Command::Templates => {
            for template in Catalog::builtin().iter() {
                println!("{:>10}  {} ({} captions)", template.id, template.name, template.slot_count);
            }
        }
        Command::Compose(args) => {
            let (_, png) = compose(&args).await?;
            write_png(&args.out, &png).await?;
        }
        Command::Publish(args) => {
            let (composer, png) = compose(&args.compose).await?;
            write_png(&args.compose.out, &png).await?;

            let template = composer.template().map(|t| t.name.clone()).unwrap_or_default();
            let request = CreateMemeRequest {
                name: Some(args.name.unwrap_or_else(|| composer.display_name())),
                image_data: Some(imagedata::to_data_url("image/png", &png)),
                template: Some(template),
                captions: Some(composer.caption_texts()),
            };
            let record = api.create_meme(&request).await.context("publish meme")?;
            local.save(record.clone()).await.context("save meme locally")?;
            println!("published {} \"{}\"", record.id, record.name);
        }
        Command::Gallery(args) => match args.author {
            Some(uid) => {
                for record in api.list_user_memes(&uid).await? {
                    print_summary(&record);
                }
            }
            None => {
                let mut feed = FeedStore::new(api, local);
                feed.load(1, true).await?;
                while feed.current_page() < args.page && feed.has_more() {
                    feed.load_more().await?;
                }
                if feed.is_offline() {
                    eprintln!("server unreachable, showing memes saved on this machine");
                }
                for record in feed.memes() {
                    print_summary(record);
                }
                if feed.has_more() {
                    eprintln!("more available: --page {}", feed.current_page() + 1);
                }
            }
        },
        Command::Show { id } => {
            let record = api.get_meme(id).await?;
            print_summary(&record);
            for caption in &record.captions {
                println!("    caption: {caption}");
            }
            for comment in &record.comments {
                println!("    {} ({}): {}", comment.user_name, comment.created_at.format("%Y-%m-%d"), comment.text);
            }
        }
        Command::Vote { id, direction } => {
            let Some(identity) = session.current_identity().await else {
                bail!("voting needs --token");
            };
            let mut feed = FeedStore::new(api.clone(), local);
            feed.add(api.get_meme(id).await?);
            match feed.vote(id, &identity.uid, direction.into()).await? {
                Some(kind) => println!("{kind:?} recorded"),
                None => println!("vote cleared"),
            }
            if let Some(record) = feed.get(id) {
                print_summary(record);
            }
        }
        Command::Comment { id, text } => {
            let record = api.comment(id, &text).await?;
            println!("{} comments on {}", record.comments.len(), record.id);
        }
        Command::Delete { id, admin } => {
            let response = if admin {
                api.admin_delete_meme(id).await?
            } else {
                api.delete_meme(id).await?
            };
            local.delete(id).await.context("remove local copy")?;
            println!("{}", response.message);
        }
        Command::Stats => {
            let stats = api.admin_stats().await?;
            println!("total memes:  {}", stats.total_memes);
            println!("last 24h:     {}", stats.recent_memes);
            for user in stats.top_users {
                println!("  {:>4}  {}", user.count, user.name.as_deref().unwrap_or("(anonymous)"));
            }
        }
        Command::Health => {
            let health = api.health().await?;
            println!("{}: {}", health.status, health.message);
        }
    }
    Ok(())
}

async fn compose(args: &ComposeArgs) -> anyhow::Result<(Composer, Vec<u8>)> {
    let template = match (&args.template, &args.image) {
        (Some(key), _) => {
            let catalog = Catalog::builtin();
            catalog
                .get(key)
                .or_else(|| catalog.find_by_name(key))
                .cloned()
                .with_context(|| format!("no template '{key}', see `meme-cli templates`"))?
        }
        (None, Some(image)) => Template::custom("Custom", image.clone()),
        (None, None) => bail!("pass --template or --image"),
    };

    let mut composer = Composer::new(ComposerOptions {
        font_scale: args.font_scale,
        default_color: args.color,
        ..Default::default()
    });
    composer
        .load_template(&template, &DefaultImageSource::new())
        .await
        .with_context(|| format!("load template '{}'", template.name))?;

    while composer.fields().len() < args.captions.len() {
        composer.add_field()?;
    }
    let ids: Vec<_> = composer.fields().iter().map(|f| f.id).collect();
    for (id, caption) in ids.iter().zip(&args.captions) {
        composer.set_text(*id, caption.as_str())?;
    }

    // Positions go through a drag in a 100x100 container, so 1 unit = 1%.
    let container = Rect::new(0.0, 0.0, 100.0, 100.0);
    for (id, target) in ids.iter().zip(&args.positions) {
        let Some(current) = composer.field(*id).map(|f| f.position) else {
            continue;
        };
        composer.begin_drag(*id, current, container)?;
        composer.move_field(*id, *target)?;
        composer.end_drag();
    }

    let image = composer.export_final()?.context("no template loaded")?;
    let png = encode_png(&image)?;
    Ok((composer, png))
}

async fn write_png(path: &Path, png: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    tokio::fs::write(path, png)
        .await
        .with_context(|| format!("write '{}'", path.display()))?;
    eprintln!("wrote {} ({} bytes)", path.display(), png.len());
    Ok(())
}

fn print_summary(record: &MemeRecord) {
    println!(
        "{}  {:>+4}  {}  by {}  [{}]",
        record.id,
        record.votes.score(),
        record.name,
        record.author.name().unwrap_or("anonymous"),
        record.created_at.format("%Y-%m-%d")
    );
}
