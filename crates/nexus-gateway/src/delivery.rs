//! Scheduler fired-event delivery routing (§4.7, §4.8).
//!
//! The `SchedulerEngine` tick loop (spawned in `main.rs`) only claims due
//! rows and forwards them over `mpsc` channels — it never talks to Discord,
//! Telegram, or the notification queue directly, so a slow or unreachable
//! channel can never stall the tick. The three tasks here drain those
//! channels and do the actual delivery.

use std::sync::Arc;

use nexus_core::reminder::{ReminderAction, ReminderDelivery};
use nexus_scheduler::{Job, Reminder, ScheduledFlow};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::app::AppState;

/// Bound on each fired-event queue. The scheduler uses `try_send`, so once a
/// queue fills further deliveries are dropped (and logged) rather than ever
/// blocking the 1s tick.
const DELIVERY_CHANNEL_CAPACITY: usize = 256;

/// Sender halves handed to `SchedulerEngine::new`; the matching receivers are
/// drained by the tasks `spawn` starts.
pub struct DeliveryChannels {
    pub fired_tx: mpsc::Sender<Job>,
    pub fired_reminder_tx: mpsc::Sender<Reminder>,
    pub fired_flow_tx: mpsc::Sender<ScheduledFlow>,
}

/// Spawn the three delivery-routing consumer tasks and return the senders to
/// wire into the scheduler engine.
///
/// `discord_tx`/`telegram_tx` are `Some` only when the corresponding adapter
/// was started (per `config.channels`); a fired reminder/job targeting a
/// channel that isn't running is logged and dropped.
pub fn spawn(
    state: Arc<AppState>,
    discord_tx: Option<mpsc::Sender<ReminderDelivery>>,
    telegram_tx: Option<mpsc::Sender<ReminderDelivery>>,
) -> DeliveryChannels {
    let (fired_tx, fired_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
    let (fired_reminder_tx, fired_reminder_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
    let (fired_flow_tx, fired_flow_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);

    tokio::spawn(route_jobs(
        fired_rx,
        state.clone(),
        discord_tx.clone(),
        telegram_tx.clone(),
    ));
    tokio::spawn(route_reminders(
        fired_reminder_rx,
        state.clone(),
        discord_tx,
        telegram_tx,
    ));
    tokio::spawn(route_flows(fired_flow_rx, state));

    DeliveryChannels {
        fired_tx,
        fired_reminder_tx,
        fired_flow_tx,
    }
}

/// Generic `jobs` table path (teacher's original reminder mechanism, stored
/// as a `ReminderAction` JSON blob in `jobs.action`).
async fn route_jobs(
    mut rx: mpsc::Receiver<Job>,
    state: Arc<AppState>,
    discord_tx: Option<mpsc::Sender<ReminderDelivery>>,
    telegram_tx: Option<mpsc::Sender<ReminderDelivery>>,
) {
    while let Some(job) = rx.recv().await {
        let action: ReminderAction = match serde_json::from_str(&job.action) {
            Ok(a) => a,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "undecodable job action — dropping");
                continue;
            }
        };
        deliver(&state, &job.id, action, &discord_tx, &telegram_tx).await;
    }
    info!("job delivery router exiting (channel closed)");
}

/// Dedicated `reminders` table path (§3, §4.7).
async fn route_reminders(
    mut rx: mpsc::Receiver<Reminder>,
    state: Arc<AppState>,
    discord_tx: Option<mpsc::Sender<ReminderDelivery>>,
    telegram_tx: Option<mpsc::Sender<ReminderDelivery>>,
) {
    while let Some(reminder) = rx.recv().await {
        let action = ReminderAction {
            channel: reminder.channel.clone(),
            channel_id: reminder.channel_id,
            message: reminder.message.clone(),
            image_url: reminder.image_url.clone(),
            bash_command: reminder.bash_command.clone(),
            session_key: reminder.session_key.clone(),
        };
        deliver(&state, &reminder.id, action, &discord_tx, &telegram_tx).await;
    }
    info!("reminder delivery router exiting (channel closed)");
}

async fn deliver(
    state: &Arc<AppState>,
    id: &str,
    action: ReminderAction,
    discord_tx: &Option<mpsc::Sender<ReminderDelivery>>,
    telegram_tx: &Option<mpsc::Sender<ReminderDelivery>>,
) {
    let message = match &action.bash_command {
        Some(cmd) => match run_bash(state, cmd).await {
            Ok(output) => format!("{}\n{}", action.message, output),
            Err(e) => format!("{}\n(command failed: {e})", action.message),
        },
        None => action.message.clone(),
    };

    match action.channel.as_str() {
        "discord" => {
            let delivery = ReminderDelivery {
                job_id: id.to_string(),
                channel_id: action.channel_id,
                message,
                image_url: action.image_url,
            };
            match discord_tx {
                Some(tx) if tx.send(delivery).await.is_ok() => {}
                Some(_) => warn!(id, "discord delivery channel closed — reminder dropped"),
                None => warn!(id, "reminder targets discord but no Discord adapter is running"),
            }
        }
        "telegram" => {
            let delivery = ReminderDelivery {
                job_id: id.to_string(),
                channel_id: action.channel_id,
                message,
                image_url: action.image_url,
            };
            match telegram_tx {
                Some(tx) if tx.send(delivery).await.is_ok() => {}
                Some(_) => warn!(id, "telegram delivery channel closed — reminder dropped"),
                None => warn!(id, "reminder targets telegram but no Telegram adapter is running"),
            }
        }
        _ => queue_notification(state, action.session_key.as_deref(), &message),
    }
}

/// Run the reminder's attached shell command via the shared terminal
/// subsystem, the same path `execute_command` uses.
async fn run_bash(state: &Arc<AppState>, command: &str) -> Result<String, String> {
    use nexus_agent::pipeline::MessageContext;

    let opts = nexus_terminal::ExecOptions::default();
    let result = state
        .terminal()
        .lock()
        .await
        .exec(command, opts)
        .await
        .map_err(|e| e.to_string())?;

    let mut output = result.stdout;
    if !result.stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str("[stderr]\n");
        output.push_str(&result.stderr);
    }
    Ok(output.trim().to_string())
}

/// Queue a delivered message for the polling `GET /notifications` endpoint —
/// the `"ws"`/`"http"` delivery path (no persistent push transport on that side).
fn queue_notification(state: &Arc<AppState>, session_key: Option<&str>, message: &str) {
    let key = session_key.unwrap_or("default").to_string();
    state
        .notifications
        .entry(key)
        .or_insert_with(Vec::new)
        .push(message.to_string());
}

/// Scheduled multi-step flow execution (C8, §4.8).
async fn route_flows(mut rx: mpsc::Receiver<ScheduledFlow>, state: Arc<AppState>) {
    while let Some(flow) = rx.recv().await {
        let flow_id = flow.id.clone();
        let store = state.scheduler.flows().clone();
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = nexus_flows::execute_flow(&flow, &store, &state).await {
                error!(flow_id = %flow_id, error = %e, "flow execution failed");
            }
        });
    }
    info!("flow delivery router exiting (channel closed)");
}
