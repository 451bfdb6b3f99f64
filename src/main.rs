use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use davdrop::config::Config;
use davdrop::{
    CoreMessage, CoreReply, DavDropBuilder, FileProfileStore, FolderProbeResult, FolderProber,
    MetadataMirror, ProfileStore, SurfaceRef, SurfaceRegistry, TieredProfileStore, UploadEvent,
};

#[derive(Parser, Debug)]
#[command(name = "davdrop", about = "Send images to a WebDAV server")]
struct Cli {
    /// TOML 配置文件，不存在时使用默认值
    #[arg(short, long, default_value = "davdrop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 倒计时后上传，Ctrl-C 取消
    Send {
        #[arg(long)]
        profile: String,
        #[arg(long)]
        image: String,
        #[arg(long)]
        page: String,
    },
    /// 测试连接并列出目录
    Probe {
        #[arg(long)]
        url: String,
        #[arg(long)]
        username: String,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// 列出已保存的服务器（不含密码）
    Profiles,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::load_from(&cli.config)?
    } else {
        Config::default()
    };
    davdrop::logging::init(&config.log);

    let store: Arc<dyn ProfileStore> = Arc::new(TieredProfileStore::new(
        FileProfileStore::new(&config.profiles_file),
        config.metadata_file.as_ref().map(MetadataMirror::new),
    ));

    match cli.command {
        Command::Send { profile, image, page } => send(&config, store, profile, image, page).await,
        Command::Probe { url, username, password } => {
            match FolderProber::default().probe(&url, &username, &password).await {
                FolderProbeResult::Success { folders, note } => {
                    if let Some(note) = note {
                        println!("note: {}", note);
                    }
                    for folder in folders {
                        println!("{}", folder);
                    }
                    Ok(())
                }
                FolderProbeResult::Failure { reason } => bail!(reason),
            }
        }
        Command::Profiles => {
            let metadata: Vec<_> = store.list().await?.iter().map(|p| p.metadata()).collect();
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
    }
}

async fn send(
    config: &Config,
    store: Arc<dyn ProfileStore>,
    profile_id: String,
    image_url: String,
    page_url: String,
) -> anyhow::Result<()> {
    let registry = Arc::new(SurfaceRegistry::new());
    let surface = SurfaceRef::new("cli");
    let mut events = registry.register(surface.clone()).await;

    let (davdrop, handle) = DavDropBuilder::new()
        .store(store)
        .sink(registry.clone())
        .countdown(config.countdown())
        .build()?;

    let reply = davdrop
        .handle(CoreMessage::ScheduleUpload { profile_id, image_url, page_url, surface })
        .await;
    let upload_id = match reply {
        CoreReply::Scheduled { upload_id } => upload_id,
        CoreReply::Rejected { reason } => bail!(reason),
        other => bail!("unexpected reply: {:?}", other),
    };

    let mut final_event = None;
    let mut interrupted = false;
    while final_event.is_none() {
        tokio::select! {
            event = events.recv() => {
                let event = event.context("scheduler stopped before the upload finished")?;
                print_event(&event);
                if event.is_final() {
                    final_event = Some(event);
                }
            }
            result = tokio::signal::ctrl_c(), if !interrupted => {
                result?;
                interrupted = true;
                davdrop.handle(CoreMessage::CancelUpload { upload_id: upload_id.clone() }).await;
            }
        }
    }

    handle.shutdown().await?;

    match final_event {
        Some(UploadEvent::Failed { reason, .. }) => bail!(reason),
        _ => Ok(()),
    }
}

fn print_event(event: &UploadEvent) {
    match event {
        UploadEvent::Started { server_name, delay_seconds, .. } => {
            println!("Sending to {} in {}s, press Ctrl-C to cancel", server_name, delay_seconds)
        }
        UploadEvent::Uploading { .. } => println!("Uploading..."),
        UploadEvent::Cancelled { .. } => println!("Cancelled"),
        UploadEvent::Succeeded { filename, .. } => println!("Saved as {}", filename),
        UploadEvent::Failed { reason, .. } => println!("Failed: {}", reason),
    }
}
