//! Chat Client
//!
//! Line-oriented terminal driver over [`ChatSession`]. Reads commands from
//! stdin, prints the transcript to stdout and logs to stderr.

use chat_client::config::Config;
use chat_client::errors::ClientError;
use chat_client::events::SessionEvent;
use chat_client::moderation::RosterRefresh;
use chat_client::observability::metrics::init_metrics_exporter;
use chat_client::session::ChatSession;
use common::secret::SecretString;
use common::types::{MemberId, RoomId};
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
/signup <user> <password>   create an account
/login <user> <password>    log in
/logout                     log out and forget credentials
/rooms                      list your rooms
/create <name> [desc...]    create a room
/join <room-id>             join a room by id
/connect                    open the live connection
/enter <room-id>            open a room
/close                      stop viewing the open room
/history                    reload the open room's history
/leave                      leave the open room
/members                    show the open room's members
/ban|/unban|/promote|/demote <member-id>
/quit
Anything else is sent to the open room.";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Signup { username: String, password: String },
    Login { username: String, password: String },
    Logout,
    Rooms,
    Create { name: String, description: String },
    Join(RoomId),
    Connect,
    Enter(RoomId),
    Close,
    History,
    Leave,
    Members,
    Ban(MemberId),
    Unban(MemberId),
    Promote(MemberId),
    Demote(MemberId),
    Help,
    Quit,
    Say(String),
}

impl Command {
    fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Say(line.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let mut arg = |what: &str| {
            parts
                .next()
                .map(ToString::to_string)
                .ok_or_else(|| format!("/{name} needs {what}"))
        };

        let command = match name {
            "signup" => Command::Signup {
                username: arg("a username")?,
                password: arg("a password")?,
            },
            "login" => Command::Login {
                username: arg("a username")?,
                password: arg("a password")?,
            },
            "logout" => Command::Logout,
            "rooms" => Command::Rooms,
            "create" => {
                let name = arg("a room name")?;
                let description = parts.collect::<Vec<_>>().join(" ");
                Command::Create { name, description }
            }
            "join" => Command::Join(RoomId::new(arg("a room id")?)),
            "connect" => Command::Connect,
            "enter" => Command::Enter(RoomId::new(arg("a room id")?)),
            "close" => Command::Close,
            "history" => Command::History,
            "leave" => Command::Leave,
            "members" => Command::Members,
            "ban" => Command::Ban(MemberId::new(arg("a member id")?)),
            "unban" => Command::Unban(MemberId::new(arg("a member id")?)),
            "promote" => Command::Promote(MemberId::new(arg("a member id")?)),
            "demote" => Command::Demote(MemberId::new(arg("a member id")?)),
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("Unknown command /{other}, try /help")),
        };
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        api_url = %config.api_url,
        socket_url = %config.socket_url,
        credentials_path = %config.credentials_path.display(),
        "Configuration loaded successfully"
    );

    if let Some(addr) = config.metrics_addr {
        init_metrics_exporter(addr)?;
        info!(metrics_addr = %addr, "Metrics exporter listening");
    }

    let mut session = ChatSession::from_config(config)?;
    let mut events = session.subscribe();

    match session.tokens().display_name() {
        Some(name) if session.tokens().is_authenticated() => {
            println!("Welcome back, {name}. Type /connect to go live, /help for commands.");
        }
        _ => println!("Not logged in. Type /help for commands."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => run(&mut session, command).await,
                    Err(message) => println!("{message}"),
                }
            }

            event = session.next_socket_event() => {
                session.handle_socket_event(event).await;
            }

            event = events.recv() => match event {
                Ok(event) => render(&event),
                Err(RecvError::Lagged(skipped)) => println!("({skipped} updates skipped)"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.disconnect().await;
    info!("Chat client exiting");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat=info".into());
    let json = env::var("CHAT_LOG_JSON").is_ok_and(|v| v.eq_ignore_ascii_case("true"));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run(session: &mut ChatSession, command: Command) {
    let result = match command {
        Command::Signup { username, password } => session
            .signup(&username, &SecretString::from(password))
            .await
            .map(|message| println!("{}", message.unwrap_or_else(|| "Account created".to_string()))),
        Command::Login { username, password } => session
            .login(&username, &SecretString::from(password))
            .await
            .map(|()| println!("Logged in. Type /connect to go live.")),
        Command::Logout => {
            session.logout().await;
            Ok(())
        }
        Command::Rooms => session.refresh_rooms().await.map(|_| ()),
        Command::Create { name, description } => {
            session.create_room(&name, &description).await.map(|_| ())
        }
        Command::Join(room) => session.join_room(&room).await.map(|_| ()),
        Command::Connect => session.connect().await.map(|_| ()),
        Command::Enter(room) => session.enter_and_wait(&room).await,
        Command::Close => match session.active_room().cloned() {
            Some(room) => session.leave(&room).await,
            None => Err(ClientError::NoActiveRoom),
        },
        Command::History => session.fetch_history().await,
        Command::Leave => session
            .leave_room()
            .await
            .map(|room| println!("Left room {room}")),
        Command::Members => session.fetch_roster().await.map(|_| ()),
        Command::Ban(member) => session.ban(&member).await.map(report_roster),
        Command::Unban(member) => session.unban(&member).await.map(report_roster),
        Command::Promote(member) => session.promote(&member).await.map(report_roster),
        Command::Demote(member) => session.demote(&member).await.map(report_roster),
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Say(body) => session.send_message(&body).await,
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        println!("! {}", e.user_message());
    }
}

fn report_roster(refresh: RosterRefresh) {
    if let RosterRefresh::Cleared { reason } = refresh {
        println!("Done, but the member list could not be reloaded: {reason}");
    }
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::ConnectionChanged(state) => println!("* connection {state}"),
        SessionEvent::RoomJoined { room } => println!("* joined room {room}"),
        SessionEvent::AccessDenied { room } => println!("! access to room {room} was denied"),
        SessionEvent::HistoryLoaded { room, messages } => {
            println!("--- room {room} ---");
            for message in messages {
                println!("[{}] {}: {}", message.timestamp, message.sender, message.message);
            }
        }
        SessionEvent::MessageReceived { message, .. } => {
            println!("[{}] {}: {}", message.timestamp, message.sender, message.message);
        }
        SessionEvent::RosterUpdated { room, roster } => {
            println!("--- members of {room} ---");
            for (id, entry) in roster {
                println!("{} ({id}) {}", entry.display_name, entry.role);
            }
        }
        SessionEvent::RosterCleared { room } => println!("! member list for {room} unavailable"),
        SessionEvent::RoomsUpdated { rooms } => {
            if rooms.is_empty() {
                println!("You are not in any rooms.");
            }
            for room in rooms {
                println!("{}  {}  {}", room.id, room.name, room.description);
            }
        }
        SessionEvent::ServerError(message) => println!("! server: {message}"),
        SessionEvent::TransportError(message) => println!("! connection: {message}"),
        SessionEvent::AuthenticationLost => {
            println!("! your session has expired, please /login again");
        }
        SessionEvent::LoggedOut => println!("* logged out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            Command::parse("  hello there "),
            Ok(Command::Say("hello there".to_string()))
        );
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(
            Command::parse("/enter 42"),
            Ok(Command::Enter(RoomId::new("42")))
        );
        assert_eq!(
            Command::parse("/create lobby the main room"),
            Ok(Command::Create {
                name: "lobby".to_string(),
                description: "the main room".to_string()
            })
        );
        assert_eq!(
            Command::parse("/promote u7"),
            Ok(Command::Promote(MemberId::new("u7")))
        );
    }

    #[test]
    fn test_missing_argument_reported() {
        assert_eq!(
            Command::parse("/ban"),
            Err("/ban needs a member id".to_string())
        );
        assert!(Command::parse("/login alice").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(Command::parse("/dance").is_err());
    }
}
