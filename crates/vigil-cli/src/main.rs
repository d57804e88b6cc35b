use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;

#[zbus::proxy(
    interface = "org.freedesktop.Vigil1",
    default_service = "org.freedesktop.Vigil1",
    default_path = "/org/freedesktop/Vigil1"
)]
trait Vigil {
    fn status(&self) -> zbus::Result<String>;
    fn train(&self, force: bool) -> zbus::Result<bool>;
    fn report_presence(&self, present: bool) -> zbus::Result<()>;
    fn add_user(&self, name: &str) -> zbus::Result<()>;
    fn remove_user(&self, name: &str) -> zbus::Result<()>;
    fn list_users(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn presence_changed(&self, present: bool) -> zbus::Result<()>;
    #[zbus(signal)]
    fn countdown_changed(&self, seconds: i64) -> zbus::Result<()>;
    #[zbus(signal)]
    fn lock_changed(&self, locked: bool) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil presence lock CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Trigger a training run
    Train {
        /// Train even if the session is not idle
        #[arg(short, long)]
        force: bool,
    },
    /// Manage the authorized-user whitelist
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Report a presence observation to the daemon
    Report { state: PresenceState },
    /// Follow presence, countdown and lock events
    Watch,
}

#[derive(Subcommand)]
enum UserAction {
    /// List whitelisted users
    List,
    /// Add a user
    Add { name: String },
    /// Remove a user
    Remove { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum PresenceState {
    Present,
    Absent,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session().await?;
    let proxy = VigilProxy::new(&conn).await?;

    match cli.command {
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
        Commands::Train { force } => {
            if proxy.train(force).await? {
                println!("training completed");
            } else {
                println!("training skipped (session busy or a run is already in progress)");
            }
        }
        Commands::Users { action } => match action {
            UserAction::List => {
                let users: Vec<String> = serde_json::from_str(&proxy.list_users().await?)?;
                if users.is_empty() {
                    println!("no users whitelisted");
                }
                for user in users {
                    println!("{user}");
                }
            }
            UserAction::Add { name } => {
                proxy.add_user(&name).await?;
                println!("added {name}");
            }
            UserAction::Remove { name } => {
                proxy.remove_user(&name).await?;
                println!("removed {name}");
            }
        },
        Commands::Report { state } => {
            proxy
                .report_presence(matches!(state, PresenceState::Present))
                .await?;
        }
        Commands::Watch => watch(&proxy).await?,
    }

    Ok(())
}

async fn watch(proxy: &VigilProxy<'_>) -> Result<()> {
    let mut presence = proxy.receive_presence_changed().await?;
    let mut countdown = proxy.receive_countdown_changed().await?;
    let mut lock = proxy.receive_lock_changed().await?;

    loop {
        tokio::select! {
            Some(signal) = presence.next() => {
                let args = signal.args()?;
                println!("presence: {}", if *args.present() { "present" } else { "absent" });
            }
            Some(signal) = countdown.next() => {
                let args = signal.args()?;
                match *args.seconds() {
                    -1 => println!("countdown: cleared"),
                    s => println!("countdown: locking in {s}s"),
                }
            }
            Some(signal) = lock.next() => {
                let args = signal.args()?;
                println!("lock: {}", if *args.locked() { "locked" } else { "unlocked" });
            }
            else => break,
        }
    }
    Ok(())
}
