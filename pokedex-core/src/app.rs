use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use threadpool::ThreadPool;

use crate::{
    data::{AppState, Bitmap, Promise, PromiseState, RosterEntry, Route, SelectedItem},
    error::Error,
    webapi::WebApi,
};

const MAX_IMAGE_THREADS: usize = 32;

/// The original Kanto Pokédex.
pub const KANTO_ROSTER_SIZE: usize = 151;

pub enum AppCommand {
    FinishSplash,
    ShowRoster { limit: usize },
    LeaveRoster,
    /// Select the entry at a 1-based grid position.  The position is resolved
    /// to the entry's own id before any request goes out.
    Select { position: usize },
    Dismiss,
    LoadImage { location: Arc<str> },
    Quit,
}

pub enum AppEvent {
    Command(AppCommand),
    /// Roster fetch either succeeded or failed.
    RosterLoaded {
        limit: usize,
        result: Result<Vec<RosterEntry>, Error>,
    },
    /// Name fetch for a selection either succeeded or failed.
    NameResolved {
        id: u32,
        result: Result<Arc<str>, Error>,
    },
    /// Artwork download for one cell either succeeded or failed.
    ImageLoaded {
        location: Arc<str>,
        result: Result<Bitmap, Error>,
    },
}

/// Cancellation token for one in-flight download, scoped to the screen that
/// requested it.  A cancelled worker drops its result instead of sending.
#[derive(Clone, Default)]
struct LoadToken(Arc<AtomicBool>);

impl LoadToken {
    fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The view model.  Owns all UI-bound state; `handle` is the only place it
/// mutates, and the shell is expected to call `handle` from a single thread,
/// draining `receiver()`.  Workers never touch state, they send events back.
pub struct Pokedex {
    state: AppState,
    sender: Sender<AppEvent>,
    receiver: Receiver<AppEvent>,
    image_pool: ThreadPool,
    image_tokens: HashMap<Arc<str>, LoadToken>,
    running: bool,
}

impl Pokedex {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            state: AppState::default(),
            sender,
            receiver,
            image_pool: ThreadPool::with_name("image_loading".into(), MAX_IMAGE_THREADS),
            image_tokens: HashMap::new(),
            running: true,
        }
    }

    pub fn sender(&self) -> Sender<AppEvent> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<AppEvent> {
        self.receiver.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::Command(cmd) => {
                self.handle_command(cmd);
            }
            AppEvent::RosterLoaded { limit, result } => {
                self.handle_roster_loaded(limit, result);
            }
            AppEvent::NameResolved { id, result } => {
                self.handle_name_resolved(id, result);
            }
            AppEvent::ImageLoaded { location, result } => {
                self.handle_image_loaded(location, result);
            }
        }
    }

    fn handle_command(&mut self, cmd: AppCommand) {
        match cmd {
            AppCommand::FinishSplash => self.finish_splash(),
            AppCommand::ShowRoster { limit } => self.show_roster(limit),
            AppCommand::LeaveRoster => self.leave_roster(),
            AppCommand::Select { position } => self.select(position),
            AppCommand::Dismiss => self.dismiss(),
            AppCommand::LoadImage { location } => self.load_image(location),
            AppCommand::Quit => {
                self.running = false;
            }
        }
    }

    fn finish_splash(&mut self) {
        if self.state.route == Route::Splash {
            self.state.route = Route::Home;
        }
    }

    fn show_roster(&mut self, limit: usize) {
        if self.state.roster.state() == PromiseState::Deferred {
            return;
        }
        self.state.roster.defer(limit);
        let sender = self.sender.clone();
        thread::spawn(move || {
            let result = WebApi::global().get_roster(limit);
            let _ = sender.send(AppEvent::RosterLoaded { limit, result });
        });
    }

    fn handle_roster_loaded(&mut self, limit: usize, result: Result<Vec<RosterEntry>, Error>) {
        if let Err(err) = &result {
            log::error!("roster fetch failed: {err}");
        }
        self.state.roster.update((limit, result));
        if self.state.roster.is_resolved() {
            self.state.route = Route::Pokedex;
        }
    }

    fn leave_roster(&mut self) {
        self.state.route = Route::Home;
        self.state.roster.clear();
        self.state.selected.clear();
        // Downloads are scoped to the roster screen.
        for (_, token) in self.image_tokens.drain() {
            token.cancel();
        }
        self.state.images.clear();
    }

    fn select(&mut self, position: usize) {
        let Some(entry) = self.state.entry_at(position) else {
            log::warn!("selection out of range: {position}");
            return;
        };
        let id = entry.id;
        self.state.selected.defer(id);
        let sender = self.sender.clone();
        thread::spawn(move || {
            let result = WebApi::global().get_pokemon_name(id);
            let _ = sender.send(AppEvent::NameResolved { id, result });
        });
    }

    fn handle_name_resolved(&mut self, id: u32, result: Result<Arc<str>, Error>) {
        if !self.state.selected.is_deferred(&id) {
            // Selection changed or was dismissed while the name was in
            // flight.
            return;
        }
        match result {
            Ok(name) => match self.state.entry_by_id(id).cloned() {
                Some(entry) => self.state.selected.resolve(SelectedItem { entry, name }),
                None => self.state.selected.clear(),
            },
            Err(err) => {
                log::error!("name fetch failed for #{id}: {err}");
                self.state.selected.reject(err);
            }
        }
    }

    fn dismiss(&mut self) {
        self.state.selected.clear();
    }

    fn load_image(&mut self, location: Arc<str>) {
        match self.state.images.get(&location).map(Promise::state) {
            Some(PromiseState::Deferred) | Some(PromiseState::Resolved) => return,
            _ => {}
        }
        self.state.images.insert(location.clone(), Promise::Deferred(()));
        let token = LoadToken::default();
        self.image_tokens.insert(location.clone(), token.clone());
        let sender = self.sender.clone();
        self.image_pool.execute(move || {
            if token.is_cancelled() {
                return;
            }
            let result = WebApi::global().get_image(&location);
            if token.is_cancelled() {
                return;
            }
            let _ = sender.send(AppEvent::ImageLoaded { location, result });
        });
    }

    fn handle_image_loaded(&mut self, location: Arc<str>, result: Result<Bitmap, Error>) {
        self.image_tokens.remove(&location);
        let Some(cell) = self.state.images.get_mut(&location) else {
            // Screen was left before the download finished.
            return;
        };
        if cell.state() != PromiseState::Deferred {
            return;
        }
        if let Err(err) = &result {
            log::error!("image download failed for {location}: {err}");
        }
        cell.resolve_or_reject(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn entry(name: &str, id: u32) -> RosterEntry {
        RosterEntry::from_api(name, &format!("https://pokeapi.co/api/v2/pokemon/{id}/")).unwrap()
    }

    fn kanto_roster(limit: usize) -> Vec<RosterEntry> {
        (1..=limit as u32).map(|id| entry("pokemon", id)).collect()
    }

    fn pokedex_with_roster(entries: Vec<RosterEntry>) -> Pokedex {
        crate::webapi::install_for_tests();
        let mut pokedex = Pokedex::new();
        pokedex.handle(AppEvent::Command(AppCommand::FinishSplash));
        pokedex.handle(AppEvent::Command(AppCommand::ShowRoster {
            limit: entries.len(),
        }));
        let limit = entries.len();
        pokedex.handle(AppEvent::RosterLoaded {
            limit,
            result: Ok(entries),
        });
        pokedex
    }

    fn bitmap() -> Bitmap {
        Arc::new(DynamicImage::new_rgba8(1, 1))
    }

    #[test]
    fn roster_flow_reaches_the_grid() {
        let pokedex = pokedex_with_roster(kanto_roster(151));
        assert_eq!(pokedex.state().route, Route::Pokedex);
        assert_eq!(pokedex.state().roster.resolved().unwrap().len(), 151);
    }

    #[test]
    fn failed_roster_fetch_is_surfaced() {
        crate::webapi::install_for_tests();
        let mut pokedex = Pokedex::new();
        pokedex.handle(AppEvent::Command(AppCommand::FinishSplash));
        pokedex.handle(AppEvent::Command(AppCommand::ShowRoster { limit: 151 }));
        pokedex.handle(AppEvent::RosterLoaded {
            limit: 151,
            result: Err(Error::NetworkError("unreachable".into())),
        });
        assert_eq!(pokedex.state().route, Route::Home);
        assert!(pokedex.state().roster.is_rejected());

        // The retry affordance is simply issuing the command again.
        pokedex.handle(AppEvent::Command(AppCommand::ShowRoster { limit: 151 }));
        assert_eq!(pokedex.state().roster.state(), PromiseState::Deferred);
    }

    #[test]
    fn selection_requests_the_entry_id_at_that_position() {
        let mut pokedex = pokedex_with_roster(kanto_roster(151));
        pokedex.handle(AppEvent::Command(AppCommand::Select { position: 1 }));
        // In unmodified roster order, position and id coincide.
        assert!(pokedex.state().selected.is_deferred(&1));

        pokedex.handle(AppEvent::NameResolved {
            id: 1,
            result: Ok("bulbasaur".into()),
        });
        let item = pokedex.state().selected.resolved().unwrap();
        assert_eq!(&*item.name, "bulbasaur");
        assert_eq!(item.entry.id, 1);

        pokedex.handle(AppEvent::Command(AppCommand::Dismiss));
        assert!(pokedex.state().selected.is_empty());
    }

    #[test]
    fn selection_follows_the_entry_under_reordering() {
        // A filtered or reordered grid is exactly where inferring the id from
        // list position would silently break; the id travels with the entry
        // instead.
        let mut pokedex =
            pokedex_with_roster(vec![entry("charmander", 4), entry("bulbasaur", 1)]);
        pokedex.handle(AppEvent::Command(AppCommand::Select { position: 1 }));
        assert!(pokedex.state().selected.is_deferred(&4));
        assert!(!pokedex.state().selected.is_deferred(&1));
    }

    #[test]
    fn stale_name_resolution_is_dropped() {
        let mut pokedex = pokedex_with_roster(kanto_roster(3));
        pokedex.handle(AppEvent::Command(AppCommand::Select { position: 2 }));
        pokedex.handle(AppEvent::Command(AppCommand::Dismiss));
        pokedex.handle(AppEvent::NameResolved {
            id: 2,
            result: Ok("ivysaur".into()),
        });
        assert!(pokedex.state().selected.is_empty());
    }

    #[test]
    fn failed_name_fetch_reads_as_name_unavailable() {
        let mut pokedex = pokedex_with_roster(kanto_roster(3));
        pokedex.handle(AppEvent::Command(AppCommand::Select { position: 3 }));
        pokedex.handle(AppEvent::NameResolved {
            id: 3,
            result: Err(Error::NetworkError("unreachable".into())),
        });
        assert!(pokedex.state().selected.is_rejected());
    }

    #[test]
    fn image_cells_settle_in_terminal_states() {
        let roster = kanto_roster(2);
        let ok_cell = roster[0].image_url.clone();
        let bad_cell = roster[1].image_url.clone();
        let mut pokedex = pokedex_with_roster(roster);

        pokedex.handle(AppEvent::Command(AppCommand::LoadImage {
            location: ok_cell.clone(),
        }));
        pokedex.handle(AppEvent::Command(AppCommand::LoadImage {
            location: bad_cell.clone(),
        }));
        pokedex.handle(AppEvent::ImageLoaded {
            location: ok_cell.clone(),
            result: Ok(bitmap()),
        });
        pokedex.handle(AppEvent::ImageLoaded {
            location: bad_cell.clone(),
            result: Err(Error::NetworkError("unreachable".into())),
        });

        assert!(pokedex.state().image_state(&ok_cell).unwrap().is_resolved());
        // A failed download must end up in a distinct terminal state, not
        // loading forever.
        assert!(pokedex.state().image_state(&bad_cell).unwrap().is_rejected());
    }

    #[test]
    fn duplicate_image_requests_are_suppressed() {
        let roster = kanto_roster(1);
        let cell = roster[0].image_url.clone();
        let mut pokedex = pokedex_with_roster(roster);

        pokedex.handle(AppEvent::Command(AppCommand::LoadImage {
            location: cell.clone(),
        }));
        pokedex.handle(AppEvent::ImageLoaded {
            location: cell.clone(),
            result: Ok(bitmap()),
        });
        pokedex.handle(AppEvent::Command(AppCommand::LoadImage {
            location: cell.clone(),
        }));
        assert!(pokedex.state().image_state(&cell).unwrap().is_resolved());
        assert!(pokedex.image_tokens.is_empty());
    }

    #[test]
    fn leaving_the_roster_cancels_and_clears_everything() {
        let roster = kanto_roster(2);
        let cell = roster[0].image_url.clone();
        let mut pokedex = pokedex_with_roster(roster);

        pokedex.handle(AppEvent::Command(AppCommand::LoadImage {
            location: cell.clone(),
        }));
        let token = pokedex.image_tokens.get(&cell).unwrap().clone();
        pokedex.handle(AppEvent::Command(AppCommand::LeaveRoster));

        assert_eq!(pokedex.state().route, Route::Home);
        assert!(pokedex.state().roster.is_empty());
        assert!(pokedex.state().images.is_empty());
        assert!(token.is_cancelled());

        // A download that slipped through before cancellation is stale now.
        pokedex.handle(AppEvent::ImageLoaded {
            location: cell.clone(),
            result: Ok(bitmap()),
        });
        assert!(pokedex.state().images.is_empty());
    }

    #[test]
    fn quit_stops_the_loop() {
        crate::webapi::install_for_tests();
        let mut pokedex = Pokedex::new();
        assert!(pokedex.is_running());
        pokedex.handle(AppEvent::Command(AppCommand::Quit));
        assert!(!pokedex.is_running());
    }
}
