//! Reactive playback orchestration
//!
//! Single-writer state machine for a watch session. All state lives on the
//! decision loop: intent methods mutate synchronously and hand slow work to
//! spawned producers, which post completions back over one unbounded channel.
//! Every derived value sits in a versioned cell; producers carry the ticket
//! they were issued against and stale completions are dropped on arrival, so
//! the latest request always wins regardless of network ordering.
//!
//! Dataflow, downstream of user intent:
//! - anime/provider -> candidate pair -> audio selection -> episode list
//! - episode selection -> stream descriptor -> quality -> player media
//! - player duration -> skip intervals -> skip-button visibility
//! - player position -> resume writes, completion watchers -> tracking

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    AnimeReference, AudioVariant, CatalogResult, ResultPair, SkipInterval, SkipKind,
    StreamDescriptor, Tracking,
};
use crate::player::{MediaPlayer, PlayerEvent};
use crate::provider::{ProviderCatalog, ProviderKind, ProviderRegistry};
use crate::resume::ResumeStore;
use crate::settings::SettingsStore;
use crate::timestamps::TimestampsService;
use crate::tracking::TrackingSynchronizer;

/// Quiescence window before a typed query turns into a search request
const SEARCH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Minimum media-time distance between two resume writes
const RESUME_WRITE_SPACING_SECONDS: f64 = 1.0;

// =============================================================================
// Collaborator Contracts
// =============================================================================

/// Shell-side disambiguation when a text search returns three or more hits
#[async_trait]
pub trait ChoiceRequester: Send + Sync {
    /// Pick one candidate, or `None` to cancel the selection
    async fn choose(&self, candidates: Vec<CatalogResult>) -> Option<CatalogResult>;
}

/// Episodes already present on disk, bypassing providers entirely
pub trait LocalMediaSource: Send + Sync {
    fn episodes(&self, anime_id: i64) -> Vec<u32>;

    fn media_path(&self, anime_id: i64, episode: u32) -> Option<String>;
}

/// Session events broadcast at the core boundary
#[derive(Debug, Clone)]
pub enum CoreEvent {
    PlaybackStarted {
        anime_id: i64,
        episode: u32,
    },
    EpisodeCompleted {
        anime_id: i64,
        episode: u32,
    },
    /// A recoverable failure was absorbed; derived state stays unset
    ResolutionFailed {
        source_name: String,
        message: String,
    },
    /// Skip intervals were incomplete and the user opted in to contributing
    TimestampSubmissionRequested {
        anime_id: i64,
        episode: u32,
        duration_seconds: f64,
    },
}

// =============================================================================
// Versioned Cells
// =============================================================================

/// Value plus the generation of the request that produced it. Issuing a new
/// ticket invalidates everything still in flight against the old one.
#[derive(Debug)]
struct Cell<T> {
    value: T,
    generation: u64,
}

impl<T> Cell<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            generation: 0,
        }
    }

    /// Ticket for the next producer; outstanding work becomes stale
    fn issue(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn invalidate(&mut self) {
        self.generation += 1;
    }

    /// Store the completion only when its ticket is still current
    fn accept(&mut self, ticket: u64, value: T) -> bool {
        if ticket == self.generation {
            self.value = value;
            true
        } else {
            false
        }
    }

    fn is_current(&self, ticket: u64) -> bool {
        ticket == self.generation
    }
}

/// Producer completions, drained exclusively by the decision loop
enum Msg {
    Candidates {
        ticket: u64,
        result: CoreResult<Option<ResultPair>>,
    },
    EpisodeCount {
        ticket: u64,
        result: CoreResult<u32>,
    },
    Stream {
        ticket: u64,
        result: CoreResult<StreamDescriptor>,
    },
    Timestamps {
        ticket: u64,
        result: CoreResult<Vec<SkipInterval>>,
    },
    SearchTick {
        ticket: u64,
    },
    SearchHits {
        ticket: u64,
        result: CoreResult<Vec<CatalogResult>>,
    },
    TrackingDone {
        episode: u32,
        result: CoreResult<Option<Tracking>>,
    },
}

// =============================================================================
// Orchestrator
// =============================================================================

/// One watch session. Owned by a single task; intent methods and
/// [`PlaybackOrchestrator::settle`]/[`PlaybackOrchestrator::tick`] must be
/// called from that task, which is what serializes every state transition.
pub struct PlaybackOrchestrator {
    session_id: Uuid,
    providers: Arc<ProviderRegistry>,
    settings: Arc<SettingsStore>,
    player: Arc<dyn MediaPlayer>,
    resume: Arc<dyn ResumeStore>,
    tracking: Arc<TrackingSynchronizer>,
    timestamps: Arc<TimestampsService>,
    choices: Arc<dyn ChoiceRequester>,
    local_media: Option<Arc<dyn LocalMediaSource>>,

    tx: mpsc::UnboundedSender<Msg>,
    rx: mpsc::UnboundedReceiver<Msg>,
    events: broadcast::Sender<CoreEvent>,
    in_flight: usize,

    anime: Option<AnimeReference>,
    use_local_media: bool,
    provider: ProviderKind,
    prefer_dub: bool,
    candidates: Cell<Option<ResultPair>>,
    selected_audio: Option<CatalogResult>,
    episodes: Cell<Vec<u32>>,
    episode_request: Option<u32>,
    current_episode: Option<u32>,
    stream: Cell<Option<StreamDescriptor>>,
    selected_quality: Option<String>,
    intervals: Cell<Vec<SkipInterval>>,
    query: String,
    search_generation: u64,
    suggestions: Vec<CatalogResult>,
    position_seconds: f64,
    duration_seconds: f64,
    can_update_time: bool,
    tracking_in_flight: bool,
    advance_after_tracking: bool,
    skip_button_visible: bool,
    last_resume_write: f64,
}

impl PlaybackOrchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        settings: Arc<SettingsStore>,
        player: Arc<dyn MediaPlayer>,
        resume: Arc<dyn ResumeStore>,
        tracking: Arc<TrackingSynchronizer>,
        timestamps: Arc<TimestampsService>,
        choices: Arc<dyn ChoiceRequester>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let snapshot = settings.snapshot();

        Self {
            session_id: Uuid::new_v4(),
            providers,
            settings,
            player,
            resume,
            tracking,
            timestamps,
            choices,
            local_media: None,
            tx,
            rx,
            events,
            in_flight: 0,
            anime: None,
            use_local_media: false,
            provider: snapshot.default_provider,
            prefer_dub: snapshot.prefer_dub,
            candidates: Cell::new(None),
            selected_audio: None,
            episodes: Cell::new(Vec::new()),
            episode_request: None,
            current_episode: None,
            stream: Cell::new(None),
            selected_quality: None,
            intervals: Cell::new(Vec::new()),
            query: String::new(),
            search_generation: 0,
            suggestions: Vec::new(),
            position_seconds: 0.0,
            duration_seconds: 0.0,
            can_update_time: false,
            tracking_in_flight: false,
            advance_after_tracking: false,
            skip_button_visible: false,
            last_resume_write: 0.0,
        }
    }

    /// Attach a local-media source; sessions opened with `use_local_media`
    /// read episodes from it instead of a provider.
    pub fn with_local_media(mut self, source: Arc<dyn LocalMediaSource>) -> Self {
        self.local_media = Some(source);
        self
    }

    // =========================================================================
    // Read Surface
    // =========================================================================

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn anime(&self) -> Option<&AnimeReference> {
        self.anime.as_ref()
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn candidates(&self) -> Option<&ResultPair> {
        self.candidates.value.as_ref()
    }

    pub fn selected_audio(&self) -> Option<&CatalogResult> {
        self.selected_audio.as_ref()
    }

    pub fn episodes(&self) -> &[u32] {
        &self.episodes.value
    }

    pub fn current_episode(&self) -> Option<u32> {
        self.current_episode
    }

    pub fn stream(&self) -> Option<&StreamDescriptor> {
        self.stream.value.as_ref()
    }

    pub fn selected_quality(&self) -> Option<&str> {
        self.selected_quality.as_deref()
    }

    pub fn skip_intervals(&self) -> &[SkipInterval] {
        &self.intervals.value
    }

    pub fn suggestions(&self) -> &[CatalogResult] {
        &self.suggestions
    }

    pub fn is_skip_button_visible(&self) -> bool {
        self.skip_button_visible
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_seconds
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Subscribe to boundary events (playback lifecycle, absorbed failures)
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Loop Driving
    // =========================================================================

    /// Process completions until no producer is outstanding
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.rx.recv().await {
                Some(msg) => self.handle(msg),
                None => break,
            }
        }
    }

    /// Await and process exactly one completion
    pub async fn tick(&mut self) {
        if let Some(msg) = self.rx.recv().await {
            self.handle(msg);
        }
    }

    /// Process completions already queued, without waiting
    pub fn poll(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.handle(msg);
        }
    }

    // =========================================================================
    // Intents
    // =========================================================================

    /// Seed the episode default for the next anime selection, e.g. from a
    /// navigation deep-link. Sticky until the session ends.
    pub fn request_episode(&mut self, episode: u32) {
        self.episode_request = Some(episode);
    }

    /// Open a watch session for `anime`. Resets everything downstream and
    /// kicks off candidate resolution (or local episode discovery).
    pub fn select_anime(&mut self, anime: AnimeReference, use_local_media: bool) {
        debug!(session = %self.session_id, anime = %anime.title, "anime selected");
        self.anime = Some(anime);
        self.use_local_media = use_local_media && self.local_media.is_some();
        self.candidates.invalidate();
        self.candidates.value = None;
        self.reset_downstream_of_candidates();
        self.selected_quality = None;

        if self.use_local_media {
            self.populate_local_episodes();
        } else {
            self.spawn_candidate_resolution();
        }
    }

    /// Switch providers. Re-resolves candidates when an anime is active.
    pub fn bind_provider(&mut self, kind: ProviderKind) {
        if self.provider == kind {
            return;
        }
        self.provider = kind;
        if self.anime.is_some() && !self.use_local_media {
            self.candidates.invalidate();
            self.candidates.value = None;
            self.reset_downstream_of_candidates();
            self.selected_quality = None;
            self.spawn_candidate_resolution();
        }
    }

    /// Flip the audio preference. When the candidate pair carries both
    /// variants this forcibly unsets the episode, even if the same number
    /// gets re-picked once the new variant's episode list arrives.
    pub fn set_prefer_dub(&mut self, prefer_dub: bool) {
        if self.prefer_dub == prefer_dub {
            return;
        }
        self.prefer_dub = prefer_dub;
        self.settings.update(|s| s.prefer_dub = prefer_dub);

        let Some(pair) = self.candidates.value.clone() else {
            return;
        };
        if !pair.has_both() {
            return;
        }

        self.reset_downstream_of_candidates();
        self.selected_audio = pair.pick(prefer_dub).cloned();
        self.spawn_episode_count();
    }

    /// Select a 1-based episode. Selections outside the known episode list
    /// are absorbed and the previous selection stays in place. The list is
    /// not assumed contiguous; local inventories may carry gaps or start
    /// past episode one.
    pub fn select_episode(&mut self, episode: u32) {
        if episode == 0 {
            return;
        }
        if !self.episodes.value.is_empty() && !self.episodes.value.contains(&episode) {
            let err = CoreError::EpisodeOutOfRange {
                requested: episode,
                total: self.episodes.value.last().copied().unwrap_or(0),
            };
            self.report_failure("episodes", &err);
            return;
        }

        debug!(session = %self.session_id, episode, "episode selected");
        self.current_episode = Some(episode);
        self.can_update_time = false;
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.last_resume_write = 0.0;
        self.skip_button_visible = false;
        self.intervals.invalidate();
        self.intervals.value.clear();
        self.stream.invalidate();
        self.stream.value = None;

        if self.use_local_media {
            self.start_local_playback(episode);
        } else {
            self.spawn_stream_resolution(episode);
        }
    }

    /// Pick a quality label from the current descriptor and start playback
    pub fn select_quality(&mut self, label: &str) {
        let Some(descriptor) = self.stream.value.clone() else {
            return;
        };
        if !descriptor.qualities.contains_key(label) {
            warn!(label, "unknown quality label");
            return;
        }
        self.selected_quality = Some(label.to_string());
        self.start_stream_playback(&descriptor, label);
    }

    /// Update the live search query. Requests are debounced and only the
    /// newest query's results ever land in `suggestions`.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        self.search_generation += 1;

        let min = self.settings.snapshot().min_query_length;
        if self.query.chars().count() < min {
            self.suggestions.clear();
            return;
        }

        let ticket = self.search_generation;
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            tokio::time::sleep(SEARCH_DEBOUNCE).await;
            let _ = tx.send(Msg::SearchTick { ticket });
        });
    }

    /// Seek past the intro using the resolved interval, when one exists
    pub fn skip_intro(&mut self) {
        let Some(intro) = self.interval(SkipKind::Intro) else {
            return;
        };
        if let Err(err) = self.player.seek(intro.end_seconds) {
            self.report_failure("player", &err);
        }
    }

    /// Fixed-length manual opening skip, for episodes with no interval data
    pub fn skip_opening(&mut self) {
        let target = self.position_seconds + self.settings.snapshot().opening_skip_seconds;
        if let Err(err) = self.player.seek(target) {
            self.report_failure("player", &err);
        }
    }

    pub fn next_episode(&mut self) {
        let Some(current) = self.current_episode else {
            return;
        };
        let Some(next) = self.episode_after(current) else {
            return;
        };
        self.pause_player();
        self.can_update_time = false;
        self.select_episode(next);
    }

    pub fn previous_episode(&mut self) {
        let Some(current) = self.current_episode else {
            return;
        };
        let Some(previous) = self.episode_before(current) else {
            return;
        };
        self.pause_player();
        self.can_update_time = false;
        self.select_episode(previous);
    }

    /// Feed one player event into the session
    pub fn player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::DurationChanged(duration) => {
                self.duration_seconds = duration;
                self.spawn_timestamp_resolution();
            }
            PlayerEvent::Playing => {
                self.can_update_time = true;
                if let (Some(anime), Some(episode)) = (self.anime.as_ref(), self.current_episode)
                {
                    let anime_id = anime.id;
                    self.emit(CoreEvent::PlaybackStarted { anime_id, episode });
                }
            }
            PlayerEvent::Paused => {
                self.can_update_time = false;
            }
            PlayerEvent::PositionChanged(position) => {
                self.on_position(position);
            }
            PlayerEvent::PlaybackEnded => {
                self.on_playback_ended();
            }
        }
    }

    // =========================================================================
    // Completions
    // =========================================================================

    fn handle(&mut self, msg: Msg) {
        // one outstanding producer retires per message, stale or not
        self.in_flight = self.in_flight.saturating_sub(1);

        match msg {
            Msg::Candidates { ticket, result } => match result {
                Ok(pair) => {
                    if self.candidates.accept(ticket, pair) {
                        self.apply_candidates();
                    }
                }
                Err(err) => {
                    if self.candidates.is_current(ticket) {
                        self.report_failure("catalog", &err);
                    }
                }
            },
            Msg::EpisodeCount { ticket, result } => match result {
                Ok(count) => {
                    let list: Vec<u32> = (1..=count).collect();
                    if self.episodes.accept(ticket, list) {
                        self.apply_default_episode();
                    }
                }
                Err(err) => {
                    if self.episodes.is_current(ticket) {
                        self.report_failure("episodes", &err);
                    }
                }
            },
            Msg::Stream { ticket, result } => match result {
                Ok(descriptor) => {
                    if self.stream.accept(ticket, Some(descriptor)) {
                        self.apply_stream();
                    }
                }
                Err(err) => {
                    if self.stream.is_current(ticket) {
                        self.report_failure("stream", &err);
                    }
                }
            },
            Msg::Timestamps { ticket, result } => match result {
                Ok(intervals) => {
                    if self.intervals.accept(ticket, intervals) {
                        self.update_skip_visibility();
                    }
                }
                Err(err) => {
                    // playable without skip data, keep it quiet
                    if self.intervals.is_current(ticket) {
                        debug!(error = %err, "skip interval lookup failed");
                    }
                }
            },
            Msg::SearchTick { ticket } => {
                if ticket == self.search_generation {
                    self.spawn_search(ticket);
                }
            }
            Msg::SearchHits { ticket, result } => {
                if ticket == self.search_generation {
                    match result {
                        Ok(hits) => self.suggestions = hits,
                        Err(err) => self.report_failure("search", &err),
                    }
                }
            }
            Msg::TrackingDone { episode, result } => {
                self.tracking_in_flight = false;
                match result {
                    Ok(Some(applied)) => {
                        if let Some(anime) = self.anime.as_mut() {
                            anime.tracking = Some(applied);
                        }
                        // the user may have stepped to another episode while
                        // the write was in flight; its resume position is
                        // stale now that the previous one counts as watched
                        if let (Some(anime_id), Some(current)) =
                            (self.anime.as_ref().map(|a| a.id), self.current_episode)
                        {
                            if current != episode {
                                self.resume.reset(anime_id, current);
                            }
                        }
                        self.maybe_request_timestamp_submission(episode);
                    }
                    Ok(None) => {}
                    Err(err) => self.report_failure("tracking", &err),
                }
                if self.advance_after_tracking {
                    self.advance_after_tracking = false;
                    self.advance_to_next();
                }
            }
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Everything derived from the candidate pair starts over
    fn reset_downstream_of_candidates(&mut self) {
        self.selected_audio = None;
        self.episodes.invalidate();
        self.episodes.value.clear();
        self.current_episode = None;
        self.stream.invalidate();
        self.stream.value = None;
        self.intervals.invalidate();
        self.intervals.value.clear();
        self.position_seconds = 0.0;
        self.duration_seconds = 0.0;
        self.can_update_time = false;
        self.skip_button_visible = false;
        self.last_resume_write = 0.0;
    }

    fn apply_candidates(&mut self) {
        match self.candidates.value.clone() {
            Some(pair) => {
                self.selected_audio = pair.pick(self.prefer_dub).cloned();
                self.spawn_episode_count();
            }
            None => {
                // no automatic match; the shell falls back to manual search
                warn!(session = %self.session_id, "no catalog match for selected anime");
            }
        }
    }

    /// Default episode rule: requested, else one past tracked progress,
    /// else the first. Stays unset when the default runs past the known
    /// totals or is missing from the available list.
    fn apply_default_episode(&mut self) {
        let Some(anime) = self.anime.as_ref() else {
            return;
        };
        let candidate = self
            .episode_request
            .unwrap_or_else(|| anime.watched_episodes() + 1);

        if let Some(total) = anime.total_episodes {
            if candidate > total {
                debug!(candidate, total, "default episode beyond total, waiting for choice");
                return;
            }
        }
        if !self.episodes.value.is_empty() && !self.episodes.value.contains(&candidate) {
            debug!(candidate, "default episode not in the available list");
            return;
        }
        self.select_episode(candidate);
    }

    fn apply_stream(&mut self) {
        let Some(descriptor) = self.stream.value.clone() else {
            return;
        };

        // an earlier quality choice survives re-resolution when the fresh
        // descriptor still offers the same label
        let retained = self
            .selected_quality
            .as_ref()
            .filter(|label| descriptor.qualities.contains_key(*label))
            .cloned();

        match retained {
            Some(label) => self.start_stream_playback(&descriptor, &label),
            None => {
                self.selected_quality = None;
                if descriptor.qualities.len() == 1 {
                    if let Some(label) = descriptor.quality_labels().next().map(str::to_string) {
                        self.selected_quality = Some(label.clone());
                        self.start_stream_playback(&descriptor, &label);
                    }
                }
                // multiple qualities and no prior choice: wait for an
                // explicit select_quality
            }
        }
    }

    fn start_stream_playback(&mut self, descriptor: &StreamDescriptor, label: &str) {
        let Some(url) = descriptor.qualities.get(label).cloned() else {
            return;
        };
        let from = match (self.anime.as_ref().map(|a| a.id), self.current_episode) {
            (Some(anime_id), Some(episode)) => self.resume.get_time(anime_id, episode),
            _ => 0.0,
        };
        let started = self.player.set_media(&url).and_then(|_| self.player.play(from));
        if let Err(err) = started {
            self.report_failure("player", &err);
        }
    }

    fn start_local_playback(&mut self, episode: u32) {
        let path = match (self.local_media.as_ref(), self.anime.as_ref()) {
            (Some(source), Some(anime)) => source.media_path(anime.id, episode),
            _ => return,
        };
        let Some(anime_id) = self.anime.as_ref().map(|a| a.id) else {
            return;
        };
        match path {
            Some(path) => {
                let from = self.resume.get_time(anime_id, episode);
                let started = self.player.set_media(&path).and_then(|_| self.player.play(from));
                if let Err(err) = started {
                    self.report_failure("player", &err);
                }
            }
            None => warn!(episode, "no local media for episode"),
        }
    }

    fn populate_local_episodes(&mut self) {
        let episodes = match (self.local_media.as_ref(), self.anime.as_ref()) {
            (Some(source), Some(anime)) => {
                let mut list = source.episodes(anime.id);
                list.sort_unstable();
                list
            }
            _ => return,
        };
        self.episodes.issue();
        self.episodes.value = episodes;
        self.apply_default_episode();
    }

    // =========================================================================
    // Position Watchers
    // =========================================================================

    fn on_position(&mut self, position: f64) {
        self.position_seconds = position;
        self.update_skip_visibility();
        self.write_resume(position);
        self.check_completion(position);
    }

    fn update_skip_visibility(&mut self) {
        let in_intro = self
            .interval(SkipKind::Intro)
            .map(|i| i.contains(self.position_seconds))
            .unwrap_or(false);
        let before_outro = self
            .interval(SkipKind::Outro)
            .map(|o| self.position_seconds < o.start_seconds)
            .unwrap_or(true);
        self.skip_button_visible = in_intro && before_outro;
    }

    fn write_resume(&mut self, position: f64) {
        if !self.can_update_time {
            return;
        }
        let Some(anime_id) = self.anime.as_ref().map(|a| a.id) else {
            return;
        };
        let Some(episode) = self.current_episode else {
            return;
        };
        if position <= self.settings.snapshot().resume_min_position_seconds {
            return;
        }
        if (position - self.last_resume_write).abs() < RESUME_WRITE_SPACING_SECONDS {
            return;
        }
        self.resume.update(anime_id, episode, position);
        self.last_resume_write = position;
    }

    /// Outro-triggered completion when an outro interval is known,
    /// tail-triggered otherwise. Each fires at most once per episode: the
    /// in-flight flag suppresses ticks while the update runs, and the
    /// watched-count guard suppresses everything after it lands.
    fn check_completion(&mut self, position: f64) {
        let Some(episode) = self.current_episode else {
            return;
        };
        let watched = self.anime.as_ref().map(|a| a.watched_episodes()).unwrap_or(0);
        if self.tracking_in_flight || watched >= episode {
            return;
        }

        let fired = match self.interval(SkipKind::Outro) {
            Some(outro) => position >= outro.start_seconds,
            None => {
                let threshold = self.settings.snapshot().completion_threshold_seconds;
                self.duration_seconds > 0.0 && self.duration_seconds - position <= threshold
            }
        };
        if fired {
            self.fire_tracking(episode, None);
        }
    }

    fn on_playback_ended(&mut self) {
        self.can_update_time = false;
        let Some(episode) = self.current_episode else {
            return;
        };
        if let Some(anime) = self.anime.as_ref() {
            let anime_id = anime.id;
            self.emit(CoreEvent::EpisodeCompleted { anime_id, episode });
        }

        let watched = self.anime.as_ref().map(|a| a.watched_episodes()).unwrap_or(0);
        if self.tracking_in_flight {
            self.advance_after_tracking = true;
        } else if watched < episode {
            let next = self.episode_after(episode);
            self.fire_tracking(episode, next);
            self.advance_after_tracking = true;
        } else {
            self.advance_to_next();
        }
    }

    fn advance_to_next(&mut self) {
        let Some(current) = self.current_episode else {
            return;
        };
        let Some(next) = self.episode_after(current) else {
            return;
        };
        self.pause_player();
        self.select_episode(next);
    }

    // =========================================================================
    // Producers
    // =========================================================================

    fn spawn_candidate_resolution(&mut self) {
        let Some(anime) = self.anime.clone() else {
            return;
        };
        let catalog = match self.providers.get(self.provider) {
            Some(handle) => handle.catalog.clone(),
            None => {
                warn!(provider = %self.provider, "no provider registered");
                return;
            }
        };
        let ticket = self.candidates.issue();
        let choices = self.choices.clone();
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = resolve_candidates(catalog, choices, anime).await;
            let _ = tx.send(Msg::Candidates { ticket, result });
        });
    }

    fn spawn_episode_count(&mut self) {
        let Some(selected) = self.selected_audio.clone() else {
            return;
        };
        let resolver = match self.providers.get(self.provider) {
            Some(handle) => handle.resolver.clone(),
            None => return,
        };
        let ticket = self.episodes.issue();
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = resolver.episode_count(&selected.url).await;
            let _ = tx.send(Msg::EpisodeCount { ticket, result });
        });
    }

    fn spawn_stream_resolution(&mut self, episode: u32) {
        let Some(selected) = self.selected_audio.clone() else {
            return;
        };
        let resolver = match self.providers.get(self.provider) {
            Some(handle) => handle.resolver.clone(),
            None => return,
        };
        let ticket = self.stream.issue();
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = resolver.resolve_stream(&selected.url, episode).await;
            let _ = tx.send(Msg::Stream { ticket, result });
        });
    }

    fn spawn_timestamp_resolution(&mut self) {
        let Some(anime_id) = self.anime.as_ref().map(|a| a.id) else {
            return;
        };
        let Some(episode) = self.current_episode else {
            return;
        };
        if self.duration_seconds <= 0.0 {
            return;
        }
        let ticket = self.intervals.issue();
        let service = self.timestamps.clone();
        let duration = self.duration_seconds;
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = service.get_timestamps(anime_id, episode, duration).await;
            let _ = tx.send(Msg::Timestamps { ticket, result });
        });
    }

    fn spawn_search(&mut self, ticket: u64) {
        let catalog = match self.providers.get(self.provider) {
            Some(handle) => handle.catalog.clone(),
            None => return,
        };
        let query = self.query.clone();
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = catalog.search(&query).await;
            let _ = tx.send(Msg::SearchHits { ticket, result });
        });
    }

    /// Kick off the watched-count update. `next_selected` names the episode
    /// about to play after the write lands, so the synchronizer can clear
    /// its stale resume position before playback reaches it.
    fn fire_tracking(&mut self, episode: u32, next_selected: Option<u32>) {
        let Some(anime) = self.anime.clone() else {
            return;
        };
        if self.tracking_in_flight || anime.watched_episodes() >= episode {
            return;
        }
        self.tracking_in_flight = true;
        let sync = self.tracking.clone();
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = sync.sync(&anime, episode, next_selected).await;
            let _ = tx.send(Msg::TrackingDone { episode, result });
        });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn interval(&self, kind: SkipKind) -> Option<SkipInterval> {
        self.intervals.value.iter().copied().find(|i| i.kind == kind)
    }

    /// Next member of the episode list after `current`. Lists are kept
    /// sorted ascending, so stepping walks adjacent members rather than
    /// assuming contiguous numbering.
    fn episode_after(&self, current: u32) -> Option<u32> {
        self.episodes.value.iter().copied().find(|&e| e > current)
    }

    fn episode_before(&self, current: u32) -> Option<u32> {
        self.episodes
            .value
            .iter()
            .copied()
            .take_while(|&e| e < current)
            .last()
    }

    fn maybe_request_timestamp_submission(&mut self, episode: u32) {
        if !self.settings.snapshot().contribute_timestamps {
            return;
        }
        if self.intervals.value.len() >= 2 {
            return;
        }
        let Some(anime_id) = self.anime.as_ref().map(|a| a.id) else {
            return;
        };
        self.emit(CoreEvent::TimestampSubmissionRequested {
            anime_id,
            episode,
            duration_seconds: self.duration_seconds,
        });
    }

    fn pause_player(&mut self) {
        if let Err(err) = self.player.pause() {
            debug!(error = %err, "pause failed");
        }
    }

    fn report_failure(&mut self, source_name: &str, err: &CoreError) {
        warn!(source = source_name, error = %err, "operation failed");
        self.emit(CoreEvent::ResolutionFailed {
            source_name: source_name.to_string(),
            message: err.to_string(),
        });
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }
}

/// Resolve the sub/dub candidate pair for an anime against one catalog.
///
/// Direct id lookup wins when the provider supports it. Text search falls
/// back to hit-count conventions: no hits means no automatic match, a
/// single hit is sub-only, exactly two follow the sub-then-dub listing
/// convention, and anything more is handed to the shell to disambiguate.
async fn resolve_candidates(
    catalog: Arc<dyn ProviderCatalog>,
    choices: Arc<dyn ChoiceRequester>,
    anime: AnimeReference,
) -> CoreResult<Option<ResultPair>> {
    if let Some(pair) = catalog.search_by_id(anime.id).await? {
        return Ok(Some(pair));
    }

    let hits = catalog.search(&anime.title).await?;
    match hits.len() {
        0 => Ok(None),
        1 => {
            let mut iter = hits.into_iter();
            Ok(iter.next().map(ResultPair::sub_only))
        }
        2 => {
            let mut iter = hits.into_iter();
            match (iter.next(), iter.next()) {
                (Some(sub), Some(dub)) => Ok(Some(ResultPair::both(
                    CatalogResult {
                        audio: AudioVariant::Sub,
                        ..sub
                    },
                    CatalogResult {
                        audio: AudioVariant::Dub,
                        ..dub
                    },
                ))),
                _ => Ok(None),
            }
        }
        _ => Ok(choices.choose(hits).await.map(ResultPair::sub_only)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderHandle, StreamResolver};
    use crate::resume::MemoryResumeStore;
    use crate::settings::Settings;
    use crate::timestamps::SkipTimeSource;
    use crate::tracking::TrackingClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCatalog {
        hits: Vec<CatalogResult>,
        calls: AtomicUsize,
    }

    impl StubCatalog {
        fn new(hits: Vec<CatalogResult>) -> Self {
            Self {
                hits,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderCatalog for StubCatalog {
        async fn search(&self, _query: &str) -> CoreResult<Vec<CatalogResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
    }

    /// Catalog with a working direct-id lookup; text search counts calls
    struct IdCatalog {
        searches: AtomicUsize,
    }

    #[async_trait]
    impl ProviderCatalog for IdCatalog {
        async fn search(&self, _query: &str) -> CoreResult<Vec<CatalogResult>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn search_by_id(&self, id: i64) -> CoreResult<Option<ResultPair>> {
            Ok(Some(ResultPair::both(
                CatalogResult {
                    title: "Show".into(),
                    url: format!("https://p/id/{id}"),
                    audio: AudioVariant::Sub,
                },
                CatalogResult {
                    title: "Show (Dub)".into(),
                    url: format!("https://p/id/{id}-dub"),
                    audio: AudioVariant::Dub,
                },
            )))
        }
    }

    struct StubResolver {
        count: u32,
        slow_episode: Option<u32>,
    }

    #[async_trait]
    impl StreamResolver for StubResolver {
        async fn episode_count(&self, _url: &str) -> CoreResult<u32> {
            Ok(self.count)
        }

        async fn resolve_stream(&self, url: &str, episode: u32) -> CoreResult<StreamDescriptor> {
            if self.slow_episode == Some(episode) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if episode > self.count {
                return Err(CoreError::EpisodeOutOfRange {
                    requested: episode,
                    total: self.count,
                });
            }
            Ok(StreamDescriptor::new(episode)
                .with_quality("1080p", format!("{url}/{episode}/1080"))
                .with_quality("720p", format!("{url}/{episode}/720")))
        }
    }

    struct NoChoice;

    #[async_trait]
    impl ChoiceRequester for NoChoice {
        async fn choose(&self, _candidates: Vec<CatalogResult>) -> Option<CatalogResult> {
            None
        }
    }

    struct RecordingChoice {
        pick: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChoiceRequester for RecordingChoice {
        async fn choose(&self, candidates: Vec<CatalogResult>) -> Option<CatalogResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            candidates.into_iter().nth(self.pick)
        }
    }

    /// Player that records every media url it is handed
    #[derive(Default)]
    struct RecordingPlayer {
        media: std::sync::Mutex<Vec<String>>,
    }

    impl MediaPlayer for RecordingPlayer {
        fn set_media(&self, url: &str) -> CoreResult<()> {
            self.media.lock().unwrap().push(url.to_string());
            Ok(())
        }

        fn play(&self, _from_seconds: f64) -> CoreResult<()> {
            Ok(())
        }

        fn pause(&self) -> CoreResult<()> {
            Ok(())
        }

        fn seek(&self, _position_seconds: f64) -> CoreResult<()> {
            Ok(())
        }
    }

    struct LocalDisk {
        episodes: Vec<u32>,
    }

    impl LocalMediaSource for LocalDisk {
        fn episodes(&self, _anime_id: i64) -> Vec<u32> {
            self.episodes.clone()
        }

        fn media_path(&self, anime_id: i64, episode: u32) -> Option<String> {
            self.episodes
                .contains(&episode)
                .then(|| format!("/library/{anime_id}/{episode}.mkv"))
        }
    }

    struct CountingTracker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrackingClient for CountingTracker {
        fn is_authenticated(&self) -> bool {
            true
        }

        async fn update(&self, _anime_id: i64, tracking: Tracking) -> CoreResult<Tracking> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(tracking)
        }
    }

    struct FixedSkips {
        intervals: Vec<SkipInterval>,
    }

    #[async_trait]
    impl SkipTimeSource for FixedSkips {
        async fn skip_times(
            &self,
            _anime_id: i64,
            _episode: u32,
            _duration_seconds: f64,
        ) -> CoreResult<Vec<SkipInterval>> {
            Ok(self.intervals.clone())
        }
    }

    fn sub_dub_hits() -> Vec<CatalogResult> {
        vec![
            CatalogResult {
                title: "Show".into(),
                url: "https://p/show".into(),
                audio: AudioVariant::Sub,
            },
            CatalogResult {
                title: "Show (Dub)".into(),
                url: "https://p/show-dub".into(),
                audio: AudioVariant::Dub,
            },
        ]
    }

    fn anime(watched: u32, total: u32) -> AnimeReference {
        let mut a = AnimeReference::new(42, "Show");
        a.total_episodes = Some(total);
        if watched > 0 {
            a.tracking = Some(Tracking {
                watched_episodes: watched,
                status: crate::models::TrackingStatus::Watching,
                ..Tracking::default()
            });
        }
        a
    }

    struct Fixture {
        orchestrator: PlaybackOrchestrator,
        catalog: Arc<StubCatalog>,
        tracker: Arc<CountingTracker>,
        resume: Arc<MemoryResumeStore>,
        player: Arc<RecordingPlayer>,
    }

    fn fixture(skips: Vec<SkipInterval>, slow_episode: Option<u32>) -> Fixture {
        fixture_with(sub_dub_hits(), Arc::new(NoChoice), skips, slow_episode)
    }

    fn fixture_with(
        hits: Vec<CatalogResult>,
        choices: Arc<dyn ChoiceRequester>,
        skips: Vec<SkipInterval>,
        slow_episode: Option<u32>,
    ) -> Fixture {
        let catalog = Arc::new(StubCatalog::new(hits));
        let resolver = Arc::new(StubResolver {
            count: 12,
            slow_episode,
        });
        let registry = Arc::new(ProviderRegistry::new().with(
            ProviderKind::GogoAnime,
            ProviderHandle::new(catalog.clone(), resolver),
        ));
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let resume = Arc::new(MemoryResumeStore::new());
        let tracker = Arc::new(CountingTracker {
            calls: AtomicUsize::new(0),
        });
        let tracking = Arc::new(TrackingSynchronizer::new(tracker.clone(), resume.clone()));
        let timestamps = Arc::new(TimestampsService::new(Arc::new(FixedSkips {
            intervals: skips,
        })));
        let player = Arc::new(RecordingPlayer::default());

        let orchestrator = PlaybackOrchestrator::new(
            registry,
            settings,
            player.clone(),
            resume.clone(),
            tracking,
            timestamps,
            choices,
        );
        Fixture {
            orchestrator,
            catalog,
            tracker,
            resume,
            player,
        }
    }

    fn local_fixture(episodes: Vec<u32>) -> Fixture {
        let mut f = fixture(vec![], None);
        f.orchestrator = f
            .orchestrator
            .with_local_media(Arc::new(LocalDisk { episodes }));
        f
    }

    fn full_skips() -> Vec<SkipInterval> {
        vec![
            SkipInterval {
                kind: SkipKind::Intro,
                start_seconds: 90.0,
                end_seconds: 180.0,
            },
            SkipInterval {
                kind: SkipKind::Outro,
                start_seconds: 1180.0,
                end_seconds: 1200.0,
            },
        ]
    }

    #[tokio::test]
    async fn test_selection_defaults_to_next_unwatched() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.episodes().len(), 12);
        assert_eq!(f.orchestrator.current_episode(), Some(6));
        let audio = f.orchestrator.selected_audio().unwrap();
        assert_eq!(audio.audio, AudioVariant::Sub);
        assert_eq!(f.orchestrator.stream().unwrap().episode, 6);
    }

    #[tokio::test]
    async fn test_fully_watched_show_stays_unselected() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(12, 12), false);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.episodes().len(), 12);
        assert_eq!(f.orchestrator.current_episode(), None);
        assert!(f.orchestrator.stream().is_none());
    }

    #[tokio::test]
    async fn test_requested_episode_overrides_progress() {
        let mut f = fixture(vec![], None);
        f.orchestrator.request_episode(3);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.current_episode(), Some(3));
    }

    #[tokio::test]
    async fn test_dub_toggle_forcibly_resets_episode() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;
        assert_eq!(f.orchestrator.current_episode(), Some(6));

        f.orchestrator.set_prefer_dub(true);
        // unset immediately, before the new episode list lands
        assert_eq!(f.orchestrator.current_episode(), None);

        f.orchestrator.settle().await;
        // same default re-picked against the dub variant
        assert_eq!(f.orchestrator.current_episode(), Some(6));
        let audio = f.orchestrator.selected_audio().unwrap();
        assert_eq!(audio.audio, AudioVariant::Dub);
        assert_eq!(audio.url, "https://p/show-dub");
    }

    #[tokio::test]
    async fn test_stale_stream_resolution_is_dropped() {
        // episode 4 resolves slowly, so its completion arrives after
        // episode 5 was requested and must be ignored
        let mut f = fixture(vec![], Some(4));
        f.orchestrator.select_anime(anime(3, 12), false);
        f.orchestrator.tick().await; // candidates
        f.orchestrator.tick().await; // episode list, auto-selects 4
        assert_eq!(f.orchestrator.current_episode(), Some(4));

        // step away while episode 4 is still resolving
        f.orchestrator.select_episode(5);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.current_episode(), Some(5));
        assert_eq!(f.orchestrator.stream().unwrap().episode, 5);
    }

    #[tokio::test]
    async fn test_out_of_range_selection_reverts() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;

        let mut events = f.orchestrator.subscribe();
        f.orchestrator.select_episode(13);

        assert_eq!(f.orchestrator.current_episode(), Some(6));
        match events.try_recv() {
            Ok(CoreEvent::ResolutionFailed { source_name, .. }) => {
                assert_eq!(source_name, "episodes");
            }
            other => panic!("expected failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quality_choice_survives_episode_step() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;

        f.orchestrator.select_quality("720p");
        assert_eq!(f.orchestrator.selected_quality(), Some("720p"));

        f.orchestrator.next_episode();
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.current_episode(), Some(7));
        assert_eq!(f.orchestrator.selected_quality(), Some("720p"));
    }

    #[tokio::test]
    async fn test_skip_button_tracks_intro_window() {
        let mut f = fixture(full_skips(), None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;

        f.orchestrator.player_event(PlayerEvent::DurationChanged(1400.0));
        f.orchestrator.settle().await;
        assert_eq!(f.orchestrator.skip_intervals().len(), 2);

        f.orchestrator.player_event(PlayerEvent::PositionChanged(50.0));
        assert!(!f.orchestrator.is_skip_button_visible());

        f.orchestrator.player_event(PlayerEvent::PositionChanged(100.0));
        assert!(f.orchestrator.is_skip_button_visible());

        f.orchestrator.player_event(PlayerEvent::PositionChanged(181.0));
        assert!(!f.orchestrator.is_skip_button_visible());
    }

    #[tokio::test]
    async fn test_outro_completion_fires_exactly_once() {
        let mut f = fixture(full_skips(), None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::DurationChanged(1400.0));
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::Playing);

        f.orchestrator.player_event(PlayerEvent::PositionChanged(1179.0));
        assert_eq!(f.tracker.calls.load(Ordering::SeqCst), 0);

        // crossing the outro start fires the tracking update; further
        // ticks inside the window must not fire again
        f.orchestrator.player_event(PlayerEvent::PositionChanged(1181.0));
        f.orchestrator.player_event(PlayerEvent::PositionChanged(1183.0));
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::PositionChanged(1185.0));
        f.orchestrator.settle().await;

        assert_eq!(f.tracker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.orchestrator.anime().unwrap().watched_episodes(), 6);
    }

    #[tokio::test]
    async fn test_tail_completion_without_outro() {
        let mut f = fixture(
            vec![SkipInterval {
                kind: SkipKind::Intro,
                start_seconds: 90.0,
                end_seconds: 180.0,
            }],
            None,
        );
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::DurationChanged(1400.0));
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::Playing);

        // 1400 - 1279 = 121 > default threshold of 120
        f.orchestrator.player_event(PlayerEvent::PositionChanged(1279.0));
        assert_eq!(f.tracker.calls.load(Ordering::SeqCst), 0);

        f.orchestrator.player_event(PlayerEvent::PositionChanged(1281.0));
        f.orchestrator.settle().await;
        assert_eq!(f.tracker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_playback_ended_updates_then_advances() {
        let mut f = fixture(vec![], None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::Playing);

        // leftover position from an earlier attempt at episode 7
        f.resume.update(42, 7, 500.0);

        f.orchestrator.player_event(PlayerEvent::PlaybackEnded);
        f.orchestrator.settle().await;

        assert_eq!(f.tracker.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.orchestrator.anime().unwrap().watched_episodes(), 6);
        assert_eq!(f.orchestrator.current_episode(), Some(7));
        assert_eq!(f.orchestrator.stream().unwrap().episode, 7);
        // the advance target starts from the beginning
        assert_eq!(f.resume.get_time(42, 7), 0.0);
    }

    #[tokio::test]
    async fn test_search_debounce_latest_query_wins() {
        let mut f = fixture(vec![], None);

        f.orchestrator.set_query("naru");
        f.orchestrator.set_query("naruto");
        f.orchestrator.settle().await;

        // the first tick is stale by the time it fires, so only one
        // search request goes out
        assert_eq!(f.catalog.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.orchestrator.suggestions().len(), 2);
    }

    #[tokio::test]
    async fn test_short_query_never_searches() {
        let mut f = fixture(vec![], None);

        f.orchestrator.set_query("nar");
        f.orchestrator.settle().await;

        assert_eq!(f.catalog.calls.load(Ordering::SeqCst), 0);
        assert!(f.orchestrator.suggestions().is_empty());
    }

    #[tokio::test]
    async fn test_no_catalog_hits_leaves_session_unset() {
        let mut f = fixture_with(vec![], Arc::new(NoChoice), vec![], None);
        f.orchestrator.select_anime(anime(0, 12), false);
        f.orchestrator.settle().await;

        assert!(f.orchestrator.candidates().is_none());
        assert!(f.orchestrator.selected_audio().is_none());
        assert!(f.orchestrator.episodes().is_empty());
    }

    #[tokio::test]
    async fn test_single_hit_becomes_sub_only() {
        let hit = CatalogResult {
            title: "Show".into(),
            url: "https://p/show".into(),
            audio: AudioVariant::Sub,
        };
        let mut f = fixture_with(vec![hit], Arc::new(NoChoice), vec![], None);
        f.orchestrator.select_anime(anime(0, 12), false);
        f.orchestrator.settle().await;

        let pair = f.orchestrator.candidates().unwrap();
        assert!(pair.sub.is_some());
        assert!(pair.dub.is_none());
        assert_eq!(f.orchestrator.current_episode(), Some(1));
    }

    #[tokio::test]
    async fn test_ambiguous_hits_go_through_the_chooser() {
        let mut hits = sub_dub_hits();
        hits.push(CatalogResult {
            title: "Show Movie".into(),
            url: "https://p/show-movie".into(),
            audio: AudioVariant::Sub,
        });
        let choice = Arc::new(RecordingChoice {
            pick: 2,
            calls: AtomicUsize::new(0),
        });
        let mut f = fixture_with(hits, choice.clone(), vec![], None);
        f.orchestrator.select_anime(anime(0, 12), false);
        f.orchestrator.settle().await;

        assert_eq!(choice.calls.load(Ordering::SeqCst), 1);
        let audio = f.orchestrator.selected_audio().unwrap();
        assert_eq!(audio.url, "https://p/show-movie");
        assert!(f.orchestrator.candidates().unwrap().dub.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_choice_leaves_candidates_unset() {
        let mut hits = sub_dub_hits();
        hits.push(CatalogResult {
            title: "Show Movie".into(),
            url: "https://p/show-movie".into(),
            audio: AudioVariant::Sub,
        });
        let mut f = fixture_with(hits, Arc::new(NoChoice), vec![], None);
        f.orchestrator.select_anime(anime(0, 12), false);
        f.orchestrator.settle().await;

        assert!(f.orchestrator.candidates().is_none());
        assert!(f.orchestrator.selected_audio().is_none());
    }

    #[tokio::test]
    async fn test_direct_id_lookup_skips_text_search() {
        let catalog = Arc::new(IdCatalog {
            searches: AtomicUsize::new(0),
        });
        let pair = resolve_candidates(catalog.clone(), Arc::new(NoChoice), anime(0, 12))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pair.sub.as_ref().unwrap().url, "https://p/id/42");
        assert!(pair.dub.is_some());
        assert_eq!(catalog.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_session_bypasses_providers() {
        let mut f = local_fixture(vec![1, 2, 3]);
        f.orchestrator.select_anime(anime(1, 12), true);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.episodes(), &[1, 2, 3]);
        assert_eq!(f.orchestrator.current_episode(), Some(2));
        assert_eq!(*f.player.media.lock().unwrap(), vec!["/library/42/2.mkv"]);
        assert_eq!(f.catalog.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_noncontiguous_inventory_is_selectable() {
        // only episodes 10 to 12 exist on disk
        let mut f = local_fixture(vec![10, 11, 12]);
        f.orchestrator.select_anime(anime(0, 12), true);
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.episodes(), &[10, 11, 12]);
        // nothing below 10 exists, so no default gets picked
        assert_eq!(f.orchestrator.current_episode(), None);

        f.orchestrator.select_episode(10);
        assert_eq!(f.orchestrator.current_episode(), Some(10));

        f.orchestrator.next_episode();
        assert_eq!(f.orchestrator.current_episode(), Some(11));
        f.orchestrator.previous_episode();
        assert_eq!(f.orchestrator.current_episode(), Some(10));
        // below the first inventory entry there is nowhere to go
        f.orchestrator.previous_episode();
        assert_eq!(f.orchestrator.current_episode(), Some(10));

        assert_eq!(
            *f.player.media.lock().unwrap(),
            vec![
                "/library/42/10.mkv",
                "/library/42/11.mkv",
                "/library/42/10.mkv"
            ]
        );
    }

    #[tokio::test]
    async fn test_local_gap_in_inventory_is_skipped_over() {
        let mut f = local_fixture(vec![4, 7]);
        f.orchestrator.select_anime(anime(0, 12), true);

        // episode 5 is not on disk
        f.orchestrator.select_episode(5);
        assert_eq!(f.orchestrator.current_episode(), None);

        f.orchestrator.select_episode(4);
        f.orchestrator.next_episode();
        assert_eq!(f.orchestrator.current_episode(), Some(7));
    }

    #[tokio::test]
    async fn test_step_during_tracking_write_resets_the_new_episode() {
        let mut f = fixture(full_skips(), None);
        f.orchestrator.select_anime(anime(5, 12), false);
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::DurationChanged(1400.0));
        f.orchestrator.settle().await;
        f.orchestrator.player_event(PlayerEvent::Playing);

        // stale position from an earlier attempt at episode 7
        f.resume.update(42, 7, 300.0);

        // crossing the outro fires the tracking write for episode 6; the
        // user steps forward before it lands
        f.orchestrator.player_event(PlayerEvent::PositionChanged(1181.0));
        f.orchestrator.next_episode();
        f.orchestrator.settle().await;

        assert_eq!(f.orchestrator.current_episode(), Some(7));
        assert_eq!(f.orchestrator.anime().unwrap().watched_episodes(), 6);
        assert_eq!(f.resume.get_time(42, 7), 0.0);
    }

    #[test]
    fn test_cell_rejects_stale_ticket() {
        let mut cell = Cell::new(0u32);
        let first = cell.issue();
        let second = cell.issue();

        assert!(!cell.accept(first, 1));
        assert_eq!(cell.value, 0);
        assert!(cell.accept(second, 2));
        assert_eq!(cell.value, 2);
    }
}
