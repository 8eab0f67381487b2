mod backoff;
mod chat;
mod config;
mod control;
mod dispatch;
mod executor;
mod keepalive;
mod pubsub;
mod reactions;
mod sequencer;
mod shutdown;

use crate::backoff::Backoff;
use crate::chat::{ChatHandle, ChatSession};
use crate::config::{RelayConfig, DEFAULT_CONFIG_PATH};
use crate::control::RconConnector;
use crate::dispatch::Dispatcher;
use crate::executor::ReactionExecutor;
use crate::pubsub::{PubSubClient, SessionSettings};
use crate::reactions::Reactor;
use crate::sequencer::CommandSequencer;
use clap::Parser;
use relay_core::pubsub_ipc::SubscriptionRequest;
use std::{
	env,
	fs::OpenOptions,
	io::{self, Write},
	path::PathBuf,
	sync::{Arc, Mutex as StdMutex},
	time::Duration,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-agent")]
struct Args {
	#[arg(long, default_value = "")]
	config: String,
	#[arg(long, default_value = "")]
	log_dir: String,
	#[arg(long)]
	debug: bool,
}

struct LogGuard {
	file: Option<Arc<StdMutex<std::fs::File>>>,
}

struct MultiWriter {
	stdout_enabled: bool,
	file: Option<Arc<StdMutex<std::fs::File>>>,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();
	let config_path = resolve_config_path(&args.config);
	let config = match RelayConfig::load(&config_path) {
		Ok(config) => config,
		Err(err) => {
			eprintln!("config_error: {err}");
			std::process::exit(1);
		}
	};
	let log_dir = resolve_log_dir(&args.log_dir);
	let _log_guard = init_logging(&log_dir, &config.pubsub.channel_id, args.debug);
	info!(
		event = "relay_start",
		config = %config_path.display(),
		channel_id = %config.pubsub.channel_id,
		mc_version = %config.game.mc_version,
		modes = ?config.game.modes,
		chat_enabled = config.chat.enabled
	);

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let backoff = Backoff::new(config.pubsub.backoff_initial(), config.pubsub.backoff_max());

	let (chat, chat_task) = if config.chat.enabled {
		let session = match ChatSession::new(&config.chat, backoff.clone()) {
			Ok(session) => session,
			Err(err) => {
				error!(event = "chat_config_error", error = %err);
				std::process::exit(1);
			}
		};
		let (tx, rx) = mpsc::channel(config.chat.queue_capacity);
		let task = tokio::spawn(session.run(rx, shutdown_rx.clone()));
		(ChatHandle::new(chat_channel(&config), tx), Some(task))
	} else {
		(ChatHandle::disabled(chat_channel(&config)), None)
	};

	let connector = RconConnector {
		host: config.rcon.host.clone(),
		port: config.rcon.port,
		password: config.rcon.password.clone(),
		connect_timeout: Duration::from_secs(config.rcon.connect_timeout_secs),
		io_timeout: Duration::from_secs(config.rcon.io_timeout_secs),
	};
	let sequencer = CommandSequencer::new(
		connector,
		Duration::from_millis(config.rcon.command_delay_ms),
	);
	let (reaction_tx, reaction_rx) = mpsc::unbounded_channel();
	let executor = ReactionExecutor::new(sequencer, chat);
	let executor_task = tokio::spawn(executor.run(reaction_rx, shutdown_rx.clone()));

	let reactor = Reactor::new(
		config.reactions.clone(),
		config.pacing,
		config.game.player.clone(),
		config.game.modes.clone(),
	);
	let mut client = PubSubClient::new(
		SessionSettings::from_config(&config.pubsub),
		SubscriptionRequest::for_channel(
			&config.pubsub.channel_id,
			config.pubsub.auth_token.clone(),
		),
		Dispatcher::new(reactor),
		reaction_tx,
		backoff,
	);
	let pubsub_rx = shutdown_rx.clone();
	let pubsub_task = tokio::spawn(async move {
		client.run(pubsub_rx).await;
	});

	if let Err(err) = tokio::signal::ctrl_c().await {
		warn!(event = "signal_error", error = %err);
	}
	info!(event = "relay_shutdown");
	let _ = shutdown_tx.send(true);

	if let Err(err) = pubsub_task.await {
		warn!(event = "task_join_error", task = "pubsub", error = %err);
	}
	if let Err(err) = executor_task.await {
		warn!(event = "task_join_error", task = "executor", error = %err);
	}
	if let Some(task) = chat_task {
		if let Err(err) = task.await {
			warn!(event = "task_join_error", task = "chat", error = %err);
		}
	}
	info!(event = "relay_stop");
}

fn chat_channel(config: &RelayConfig) -> String {
	config.chat.channel.trim_start_matches('#').to_ascii_lowercase()
}

fn init_logging(log_dir: &str, channel_id: &str, debug: bool) -> Option<LogGuard> {
	let level = if debug {
		"debug".to_string()
	} else if let Ok(level) = env::var("RELAY_LOG_LEVEL") {
		level
	} else {
		"info".to_string()
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
	let writer = match open_log_file(log_dir, channel_id) {
		Ok(log_guard) => log_guard,
		Err(err) => {
			eprintln!("log_file_error: {err}");
			LogGuard { file: None }
		}
	};
	let file = writer.file.clone();
	let stdout_enabled = resolve_log_stdout() || writer.file.is_none();
	let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stdout_enabled));
	let subscriber = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(make_writer)
		.finish();
	if tracing::subscriber::set_global_default(subscriber).is_err() {
		return None;
	}
	Some(writer)
}

impl MultiWriter {
	fn new(file: Option<Arc<StdMutex<std::fs::File>>>, stdout_enabled: bool) -> Self {
		Self {
			stdout_enabled,
			file,
		}
	}
}

impl Write for MultiWriter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if self.stdout_enabled {
			let _ = io::stdout().write_all(buf);
		}
		if let Some(file) = &self.file {
			if let Ok(mut file) = file.lock() {
				let _ = file.write_all(buf);
			}
		}
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		if self.stdout_enabled {
			let _ = io::stdout().flush();
		}
		if let Some(file) = &self.file {
			if let Ok(mut file) = file.lock() {
				let _ = file.flush();
			}
		}
		Ok(())
	}
}

fn open_log_file(log_dir: &str, channel_id: &str) -> io::Result<LogGuard> {
	if log_dir.trim().is_empty() {
		return Ok(LogGuard { file: None });
	}
	let dir = PathBuf::from(log_dir);
	std::fs::create_dir_all(&dir)?;
	let path = dir.join(format!("relay-{}.log", sanitize_component(channel_id)));
	let file = OpenOptions::new().create(true).append(true).open(path)?;
	Ok(LogGuard {
		file: Some(Arc::new(StdMutex::new(file))),
	})
}

fn sanitize_component(input: &str) -> String {
	input
		.chars()
		.map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
		.collect()
}

fn resolve_config_path(flag: &str) -> PathBuf {
	if !flag.trim().is_empty() {
		return PathBuf::from(flag);
	}
	if let Ok(value) = env::var("RELAY_CONFIG") {
		if !value.trim().is_empty() {
			return PathBuf::from(value);
		}
	}
	PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn resolve_log_dir(flag: &str) -> String {
	if !flag.trim().is_empty() {
		return flag.to_string();
	}
	if let Ok(value) = env::var("RELAY_LOG_DIR") {
		if !value.trim().is_empty() {
			return value;
		}
	}
	"logs".to_string()
}

fn resolve_log_stdout() -> bool {
	if let Ok(value) = env::var("RELAY_LOG_STDOUT") {
		match value.trim() {
			"1" | "true" | "TRUE" | "yes" | "YES" => return true,
			"0" | "false" | "FALSE" | "no" | "NO" => return false,
			_ => {}
		}
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sanitize_replaces_path_characters() {
		assert_eq!(sanitize_component("12/34 ab"), "12_34_ab");
		assert_eq!(sanitize_component("chan-1_x"), "chan-1_x");
	}

	#[test]
	fn explicit_flags_win() {
		assert_eq!(resolve_config_path("custom.yaml"), PathBuf::from("custom.yaml"));
		assert_eq!(resolve_log_dir("/tmp/relay"), "/tmp/relay");
	}

	#[test]
	fn log_file_is_named_after_channel() {
		let dir = tempfile::tempdir().expect("tempdir");
		let guard = open_log_file(dir.path().to_str().expect("utf8"), "1234").expect("open");
		assert!(guard.file.is_some());
		assert!(dir.path().join("relay-1234.log").exists());
		assert!(open_log_file("", "1234").expect("skip").file.is_none());
	}
}
