use std::{io, io::BufRead, thread, time::Duration};

use env_logger::{Builder, Env};

use pokedex_core::{
    app::{AppCommand, AppEvent, Pokedex, KANTO_ROSTER_SIZE},
    data::{AppState, Promise, PromiseState, Route},
    webapi::WebApi,
};

const ENV_LOG: &str = "POKEDEX_LOG";
const ENV_LOG_STYLE: &str = "POKEDEX_LOG_STYLE";

const SPLASH_DURATION: Duration = Duration::from_secs(2);
const SPLASH_LOGO_URL: &str = "https://fontmeme.com/images/Pokemon-Logo.jpg";

fn main() {
    // Setup logging from the env variables, with defaults.
    Builder::from_env(
        Env::new()
            .filter_or(ENV_LOG, "info")
            .write_style(ENV_LOG_STYLE),
    )
    .init();

    WebApi::new().install_as_global();

    let pokedex = Pokedex::new();

    // Presentation timing belongs to the shell: hold the splash screen for a
    // moment, then move to the home screen.
    thread::spawn({
        let sender = pokedex.sender();
        move || {
            thread::sleep(SPLASH_DURATION);
            let _ = sender.send(AppEvent::Command(AppCommand::FinishSplash));
        }
    });

    // The splash logo goes through the same download path as the artwork.
    thread::spawn(|| match WebApi::global().get_image(SPLASH_LOGO_URL) {
        Ok(_) => log::info!("splash logo downloaded"),
        Err(err) => log::warn!("splash logo unavailable: {err}"),
    });

    let _input_thread = thread::spawn({
        let sender = pokedex.sender();
        move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(line.trim()) {
                    Some(cmd) => {
                        let _ = sender.send(AppEvent::Command(cmd));
                    }
                    None => log::warn!("unknown command"),
                }
            }
        }
    });

    run(pokedex);
}

fn run(mut pokedex: Pokedex) {
    for event in pokedex.receiver() {
        let roster_arrived = matches!(&event, AppEvent::RosterLoaded { .. });
        pokedex.handle(event);
        if roster_arrived {
            request_artwork(&pokedex);
        }
        render(pokedex.state());
        if !pokedex.is_running() {
            break;
        }
    }
}

fn parse_command(line: &str) -> Option<AppCommand> {
    match line {
        "show" => Some(AppCommand::ShowRoster {
            limit: KANTO_ROSTER_SIZE,
        }),
        "back" => Some(AppCommand::LeaveRoster),
        "close" => Some(AppCommand::Dismiss),
        "q" | "quit" => Some(AppCommand::Quit),
        _ => line
            .parse()
            .ok()
            .map(|position| AppCommand::Select { position }),
    }
}

/// Every grid cell asks for its artwork once, when the roster arrives.
fn request_artwork(pokedex: &Pokedex) {
    if pokedex.state().route != Route::Pokedex {
        return;
    }
    let Some(entries) = pokedex.state().roster.resolved() else {
        return;
    };
    let sender = pokedex.sender();
    for entry in entries {
        if pokedex.state().image_state(&entry.image_url).is_none() {
            let _ = sender.send(AppEvent::Command(AppCommand::LoadImage {
                location: entry.image_url.clone(),
            }));
        }
    }
}

fn render(state: &AppState) {
    match state.route {
        Route::Splash => println!("loading..."),
        Route::Home => match state.roster.state() {
            PromiseState::Deferred => println!("fetching the roster..."),
            PromiseState::Rejected => println!("roster fetch failed, type `show` to retry"),
            _ => println!("type `show` to open the Pokédex, `q` to quit"),
        },
        Route::Pokedex => render_pokedex(state),
    }
}

fn render_pokedex(state: &AppState) {
    let Some(entries) = state.roster.resolved() else {
        return;
    };
    let loaded = entries
        .iter()
        .filter(|e| matches!(state.image_state(&e.image_url), Some(p) if p.is_resolved()))
        .count();
    let failed = entries
        .iter()
        .filter(|e| matches!(state.image_state(&e.image_url), Some(p) if p.is_rejected()))
        .count();
    println!(
        "Pokédex Kanto: {} Pokémon, artwork {loaded} loaded, {failed} failed",
        entries.len()
    );
    match &state.selected {
        Promise::Empty => println!(
            "type a position (1-{}) to inspect, `back` to leave, `q` to quit",
            entries.len()
        ),
        Promise::Deferred(id) => println!("fetching name of #{id}..."),
        Promise::Resolved(item) => println!("== {} == (type `close` to dismiss)", item.name),
        Promise::Rejected(_) => println!("name unavailable (type `close` to dismiss)"),
    }
}
