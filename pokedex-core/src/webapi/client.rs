use std::{io::Read, sync::Arc, time::Duration};

use image::ImageFormat;
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Deserialize};
use ureq::Agent;

use crate::{
    data::{Bitmap, RosterEntry},
    error::Error,
};

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";

static GLOBAL_WEBAPI: OnceCell<Arc<WebApi>> = OnceCell::new();

/// Blocking client for the PokéAPI and the artwork host.  One attempt per
/// call, no retries, nothing is cached.
pub struct WebApi {
    agent: Agent,
    base_url: String,
}

#[derive(Deserialize)]
struct RosterPage {
    results: Vec<RosterItem>,
}

#[derive(Deserialize)]
struct RosterItem {
    name: String,
    url: String,
}

impl WebApi {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let agent = Agent::config_builder().timeout_global(Some(Duration::from_secs(5)));
        Self {
            agent: agent.build().into(),
            base_url: base_url.into(),
        }
    }

    pub fn install_as_global(self) {
        GLOBAL_WEBAPI
            .set(Arc::new(self))
            .map_err(|_| "already installed")
            .unwrap();
    }

    pub fn global() -> Arc<Self> {
        GLOBAL_WEBAPI.get().cloned().expect("web API not installed")
    }

    fn load<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let mut response = self.agent.get(url).call()?;
        response
            .body_mut()
            .read_json()
            .map_err(|err| Error::DecodeError(err.to_string()))
    }

    /// Fetch the first `limit` entries of the roster, in response order.
    pub fn get_roster(&self, limit: usize) -> Result<Vec<RosterEntry>, Error> {
        let url = format!("{}/pokemon?limit={}", self.base_url, limit);
        let page: RosterPage = self.load(&url)?;
        entries_from_page(page)
    }

    /// Fetch the display name of one Pokémon by its own id.
    pub fn get_pokemon_name(&self, id: u32) -> Result<Arc<str>, Error> {
        #[derive(Deserialize)]
        struct PokemonDetail {
            name: String,
        }

        let url = format!("{}/pokemon/{}", self.base_url, id);
        let detail: PokemonDetail = self.load(&url)?;
        Ok(detail.name.into())
    }

    /// Download and decode one artwork image.
    pub fn get_image(&self, uri: &str) -> Result<Bitmap, Error> {
        let response = self.agent.get(uri).call()?;
        let mut body = Vec::new();
        response.into_body().into_reader().read_to_end(&mut body)?;

        let format = match infer::get(&body) {
            Some(kind) if kind.mime_type() == "image/jpeg" => Some(ImageFormat::Jpeg),
            Some(kind) if kind.mime_type() == "image/png" => Some(ImageFormat::Png),
            _ => None,
        };
        let image = if let Some(format) = format {
            image::load_from_memory_with_format(&body, format)?
        } else {
            image::load_from_memory(&body)?
        };
        Ok(Arc::new(image))
    }
}

fn entries_from_page(page: RosterPage) -> Result<Vec<RosterEntry>, Error> {
    page.results
        .iter()
        .map(|item| RosterEntry::from_api(&item.name, &item.url))
        .collect()
}

#[cfg(test)]
pub(crate) fn install_for_tests() {
    // Tests share one process; tolerate repeated installs and point the
    // client at a port nothing listens on, so a stray worker request fails
    // fast instead of hitting the real API.
    GLOBAL_WEBAPI.get_or_init(|| Arc::new(WebApi::with_base_url("http://127.0.0.1:9")));
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER_FIXTURE: &str = r#"{
        "count": 1302,
        "next": "https://pokeapi.co/api/v2/pokemon?offset=3&limit=3",
        "previous": null,
        "results": [
            { "name": "bulbasaur", "url": "https://pokeapi.co/api/v2/pokemon/1/" },
            { "name": "ivysaur", "url": "https://pokeapi.co/api/v2/pokemon/2/" },
            { "name": "venusaur", "url": "https://pokeapi.co/api/v2/pokemon/3/" }
        ]
    }"#;

    #[test]
    fn roster_page_decodes_in_order() {
        let page: RosterPage = serde_json::from_str(ROSTER_FIXTURE).unwrap();
        let entries = entries_from_page(page).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(&*entries[0].name, "bulbasaur");
        assert!(entries[2].image_url.ends_with("/official-artwork/3.png"));
    }

    #[test]
    fn repeated_decodes_are_identical() {
        // No shared cache anywhere; two fetches of the same payload must
        // produce independent, equal rosters.
        let first =
            entries_from_page(serde_json::from_str(ROSTER_FIXTURE).unwrap()).unwrap();
        let second =
            entries_from_page(serde_json::from_str(ROSTER_FIXTURE).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_entry_url_fails_the_whole_page() {
        let page: RosterPage = serde_json::from_str(
            r#"{ "results": [ { "name": "missingno", "url": "https://pokeapi.co/api/v2/pokemon/" } ] }"#,
        )
        .unwrap();
        assert!(entries_from_page(page).is_err());
    }

    #[test]
    fn detail_shape_decodes_name_only() {
        #[derive(Deserialize)]
        struct PokemonDetail {
            name: String,
        }
        let detail: PokemonDetail =
            serde_json::from_str(r#"{ "name": "pikachu", "id": 25, "weight": 60 }"#).unwrap();
        assert_eq!(detail.name, "pikachu");
    }
}
