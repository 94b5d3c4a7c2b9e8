use reel_feed::app::{App, LinkView};
use reel_feed::config::Config;
use reel_feed::error::{AppError, Result};
use reel_feed::models::AcquisitionState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Load configuration
    let config = Config::load()?;

    let mut app = App::new(&config).await?;

    // --fetch <url>: run one link through the pipeline
    if args.len() >= 3 && args[1] == "--fetch" {
        return fetch(&mut app, &args[2]).await;
    }

    // --undismiss <message-id> <url>
    if args.len() >= 4 && args[1] == "--undismiss" {
        let message_id: i64 = args[2]
            .parse()
            .map_err(|_| AppError::Config(format!("invalid message id: {}", args[2])))?;
        app.ledger.undismiss(message_id, &args[3]).await?;
        println!("Auto-play restored for {}", args[3]);
        return Ok(());
    }

    eprintln!("usage: reel-feed --fetch <url>");
    eprintln!("       reel-feed --undismiss <message-id> <url>");
    Ok(())
}

async fn fetch(app: &mut App, url: &str) -> Result<()> {
    let mut rx = match app.render_link(0, url).await? {
        LinkView::Pipeline(rx) => rx,
        LinkView::Preview { cached, .. } => {
            match cached {
                Some(path) => println!("Dismissed, cached at {}", path.display()),
                None => println!("Dismissed"),
            }
            return Ok(());
        }
    };

    loop {
        let state = rx.borrow_and_update().clone();
        println!("{}", describe(&state));
        match state {
            AcquisitionState::Playing(_)
            | AcquisitionState::Error { .. }
            | AcquisitionState::Timeout
            | AcquisitionState::Dismissed => break,
            _ => {}
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    Ok(())
}

fn describe(state: &AcquisitionState) -> String {
    match state {
        AcquisitionState::Idle => "idle".to_string(),
        AcquisitionState::Fetching => "fetching video link".to_string(),
        AcquisitionState::Ready { remote_url, .. } => format!("resolved {}", remote_url),
        AcquisitionState::Downloading(p) => format!("downloading {:.0}%", p * 100.0),
        AcquisitionState::Playing(path) => format!("ready: {}", path.display()),
        AcquisitionState::Error { message, .. } => format!("error: {}", message),
        AcquisitionState::Timeout => "timed out".to_string(),
        AcquisitionState::Dismissed => "dismissed".to_string(),
    }
}
