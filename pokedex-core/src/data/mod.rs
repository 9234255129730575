mod promise;

pub use promise::{Promise, PromiseState};

use std::{collections::HashMap, sync::Arc};

use image::DynamicImage;
use url::Url;

use crate::error::Error;

pub type Bitmap = Arc<DynamicImage>;

/// State of one artwork cell.  `Rejected` is terminal, a failed download
/// renders as a placeholder instead of spinning forever.
pub type ImageState = Promise<Bitmap, (), Error>;

const ARTWORK_BASE_URL: &str =
    "https://raw.githubusercontent.com/PokeAPI/sprites/master/sprites/pokemon/other/official-artwork";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RosterEntry {
    pub id: u32,
    pub name: Arc<str>,
    pub url: Arc<str>,
    pub image_url: Arc<str>,
}

impl RosterEntry {
    /// Build an entry from one `{name, url}` pair of the list response.  The
    /// numeric id travels with the entry from here on, it is never derived
    /// from list position again.
    pub fn from_api(name: &str, url: &str) -> Result<Self, Error> {
        let id = entry_id_from_url(url)
            .ok_or_else(|| Error::DecodeError(format!("no numeric id in resource URL: {url}")))?;
        Ok(Self {
            id,
            name: name.into(),
            url: url.into(),
            image_url: artwork_url(id).into(),
        })
    }
}

pub fn artwork_url(id: u32) -> String {
    format!("{ARTWORK_BASE_URL}/{id}.png")
}

/// Last non-empty path segment, parsed as a number.  Handles both
/// `.../pokemon/37/` and `.../pokemon/37`.
fn entry_id_from_url(url: &str) -> Option<u32> {
    let url = Url::parse(url).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?
        .parse()
        .ok()
}

#[derive(Clone, Debug)]
pub struct SelectedItem {
    pub entry: RosterEntry,
    pub name: Arc<str>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    Splash,
    Home,
    Pokedex,
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub route: Route,
    pub roster: Promise<Vec<RosterEntry>, usize>,
    pub images: HashMap<Arc<str>, ImageState>,
    pub selected: Promise<SelectedItem, u32>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            route: Route::Splash,
            roster: Promise::Empty,
            images: HashMap::new(),
            selected: Promise::Empty,
        }
    }
}

impl AppState {
    /// Entry at a 1-based grid position, if the roster is loaded.
    pub fn entry_at(&self, position: usize) -> Option<&RosterEntry> {
        let entries = self.roster.resolved()?;
        position.checked_sub(1).and_then(|i| entries.get(i))
    }

    pub fn entry_by_id(&self, id: u32) -> Option<&RosterEntry> {
        self.roster.resolved()?.iter().find(|entry| entry.id == id)
    }

    pub fn image_state(&self, location: &str) -> Option<&ImageState> {
        self.images.get(location)
    }
}
