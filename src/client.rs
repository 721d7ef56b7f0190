use crate::{
    channel::{
        ChannelClient,
        ChannelError,
        ChannelEvent,
        Connection,
    },
    config::AppConfig,
    dispatch::{
        Action,
        ActionDispatcher,
        DispatchOutcome,
    },
    game::{
        CardIndex,
        Game,
        RoundId,
    },
    pending::PendingEstimates,
    reconcile::{
        RenderModel,
        reconcile,
    },
    ui,
};
use chrono::Local;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{
    debug,
    error,
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::EnvFilter;
use url::Url;

const LOG_FILE: &str = "planning-poker.log";

/// Log to a daily rolling file; the terminal belongs to the board.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .wrap_err_with(|| format!("failed to create log dir {}", log_dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!(e))?;
    Ok(guard)
}

/// Result of the one plain reload done after the channel is lost.
pub type Reloaded = Result<Game, ChannelError>;

pub struct AppController {
    config: AppConfig,
    channel: ChannelClient,
    dispatcher: ActionDispatcher,
    reloads: mpsc::UnboundedSender<Reloaded>,
    pending: PendingEstimates,
    game: Option<Game>,
    connection: Option<Connection>,
    live: bool,
}

enum SessionUpdate {
    Redraw,
    Resynchronize {
        error: ChannelError,
        fallback_url: Url,
    },
}

impl AppController {
    pub fn new(
        config: AppConfig,
        outcomes: mpsc::UnboundedSender<DispatchOutcome>,
        reloads: mpsc::UnboundedSender<Reloaded>,
    ) -> Result<Self> {
        let http = config.http_client()?;
        let channel = ChannelClient::new(
            config.channel_url.clone(),
            config.game_url.clone(),
            http.clone(),
            config.request_timeout,
        );
        let dispatcher = ActionDispatcher::new(config.server_url.clone(), http, outcomes);
        Ok(Self {
            config,
            channel,
            dispatcher,
            reloads,
            pending: PendingEstimates::new(),
            game: None,
            connection: None,
            live: false,
        })
    }

    /// Start a fresh channel session. Events of any previous session are
    /// dropped along with its receiver.
    fn open_session(&mut self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(old) = self.connection.take() {
            old.close();
        }
        info!(url = %self.config.channel_url, game = %self.config.game_url, "opening channel session");
        self.connection = Some(self.channel.connect(&self.config.token, tx));
        self.live = true;
        rx
    }

    fn go_offline(&mut self) {
        self.live = false;
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    fn close(&mut self) {
        self.go_offline();
    }

    fn ingest(&mut self, event: ChannelEvent) -> SessionUpdate {
        match event {
            ChannelEvent::Opened(seed) => {
                debug!(rounds = seed.len(), "seeding pending estimates");
                self.pending.seed(seed);
                SessionUpdate::Redraw
            }
            ChannelEvent::Snapshot(game) => {
                self.game = Some(game);
                SessionUpdate::Redraw
            }
            ChannelEvent::Fatal {
                error,
                fallback_url,
            } => {
                self.go_offline();
                SessionUpdate::Resynchronize {
                    error,
                    fallback_url,
                }
            }
        }
    }

    /// Load the game once over plain HTTP. The answer arrives on the reload
    /// channel so the loop keeps serving input meanwhile.
    fn reload(&self, fallback_url: Url) {
        let channel = self.channel.clone();
        let reloads = self.reloads.clone();
        tokio::spawn(async move {
            let reloaded = channel.fetch_game(&fallback_url).await;
            let _ = reloads.send(reloaded);
        });
    }

    /// A reload that lands after a new session went live is stale.
    fn apply_reload(&mut self, reloaded: Reloaded) -> Result<bool, ChannelError> {
        let game = reloaded?;
        if self.live {
            debug!("dropping reload superseded by a live session");
            return Ok(false);
        }
        self.game = Some(game);
        Ok(true)
    }

    fn vote(&mut self, round: RoundId, card: CardIndex, action: Action) {
        self.pending.set(round, card);
        self.dispatcher.dispatch(action);
    }

    pub fn render_model(&self) -> Option<RenderModel> {
        self.game
            .as_ref()
            .map(|game| reconcile(game, &self.pending, &self.config.user))
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (reload_tx, reload_rx) = mpsc::unbounded_channel();
    let controller = AppController::new(config, outcome_tx, reload_tx)?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        controller,
        &mut ui_state,
        &mut input_events,
        outcome_rx,
        reload_rx,
    )
    .await;
    ui::terminal_exit()?;
    res
}

fn redraw(
    controller: &AppController,
    ui_state: &mut ui::UiState,
    context: &'static str,
) -> Result<()> {
    match controller.render_model() {
        Some(model) => ui::draw(ui_state, &model),
        None => ui::draw_waiting(ui_state),
    }
    .wrap_err(context)
}

fn updated_status() -> String {
    format!("Updated {}", Local::now().format("%H:%M:%S"))
}

fn on_channel_event(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    event: ChannelEvent,
) -> Result<()> {
    if let ChannelEvent::Snapshot(_) = &event {
        ui_state.set_status(updated_status());
    }
    match controller.ingest(event) {
        SessionUpdate::Redraw => redraw(controller, ui_state, "draw after snapshot failed"),
        SessionUpdate::Resynchronize { error, fallback_url } => {
            warn!(error = %error, url = %fallback_url, "channel lost, reloading game");
            ui_state.set_offline(true);
            ui_state.set_status("Channel lost, reloading...");
            controller.reload(fallback_url);
            redraw(controller, ui_state, "draw before reload failed")
        }
    }
}

fn on_reload(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    reloaded: Reloaded,
) -> Result<()> {
    match controller.apply_reload(reloaded) {
        Ok(true) => ui_state.set_status(updated_status()),
        Ok(false) => return Ok(()),
        Err(err) => {
            error!(error = %err, "reload failed");
            ui_state.set_status(format!("Reload failed: {err}"));
        }
    }
    redraw(controller, ui_state, "draw after reload failed")
}

async fn run_loop(
    mut controller: AppController,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    mut outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
    mut reloads: mpsc::UnboundedReceiver<Reloaded>,
) -> Result<()> {
    info!("Running app loop");
    let mut events = controller.open_session();
    ui_state.set_status("Connecting...");
    redraw(&controller, ui_state, "draw while connecting failed")?;

    loop {
        tokio::select! {
            maybe_event = events.recv(), if controller.live => {
                let Some(event) = maybe_event else {
                    warn!("channel session dropped its sender");
                    controller.live = false;
                    continue;
                };
                on_channel_event(&mut controller, ui_state, event)?;
            }
            Some(reloaded) = reloads.recv() => {
                on_reload(&mut controller, ui_state, reloaded)?;
            }
            Some(outcome) = outcomes.recv() => {
                if !outcome.ok {
                    debug!(control = %outcome.control, "action failed, waiting for next snapshot");
                }
                ui_state.settle(&outcome);
                redraw(&controller, ui_state, "draw after action outcome failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::Reload => {
                        events = controller.open_session();
                        ui_state.set_offline(false);
                        ui_state.set_status("Reconnecting...");
                    }
                    ui::UserEvent::Vote { round, card, action } => {
                        ui_state.mark_in_flight(&action);
                        controller.vote(round, card, action);
                    }
                    ui::UserEvent::Dispatch(action) => {
                        ui_state.mark_in_flight(&action);
                        controller.dispatcher.dispatch(action);
                    }
                }
                redraw(&controller, ui_state, "draw after input failed")?;
            }
        }
    }

    info!("Leaving game");
    controller.close();
    Ok(())
}
