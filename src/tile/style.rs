//! Map style descriptor resolution.
//!
//! A style reference is either a provider-scheme identifier such as
//! `mapbox://styles/acme/basic` or an absolute `http(s)` URL. The resolver turns
//! it into a fetchable descriptor URL and, once the descriptor JSON has been
//! downloaded, extracts the tile URL templates and sprite resources it needs.
//!
//! # Credential tokens
//!
//! Provider endpoints need an `access_token` query parameter. The token is only
//! ever appended to URLs whose host belongs to the provider, and never when the
//! URL already carries one.
//!
//! # Example
//!
//! ```
//! use offline_map_proxy::tile::StyleResolver;
//!
//! let resolver = StyleResolver::default();
//! let url = resolver
//!     .resolve_style_url("mapbox://styles/acme/basic", Some("T"))
//!     .unwrap();
//! assert_eq!(
//!     url.as_str(),
//!     "https://api.mapbox.com/styles/v1/acme/basic?access_token=T"
//! );
//! ```

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::StyleError;

use super::coords::TileCoordinate;

/// Default provider scheme for style and tileset references.
pub const DEFAULT_PROVIDER_SCHEME: &str = "mapbox";

/// Default provider REST endpoint.
pub const DEFAULT_PROVIDER_API_BASE: &str = "https://api.mapbox.com";

/// Default provider host used to decide whether a URL needs the token.
pub const DEFAULT_PROVIDER_HOST: &str = "mapbox.com";

/// Query parameter carrying the credential token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Sprite resource suffixes: base and double-density, JSON and image.
const SPRITE_SUFFIXES: [&str; 4] = [".json", ".png", "@2x.json", "@2x.png"];

/// Resolves style references and extracts prefetchable resources from
/// style descriptors.
#[derive(Debug, Clone)]
pub struct StyleResolver {
    /// URL scheme of provider references (without `://`)
    scheme: String,

    /// Provider REST endpoint, without trailing slash
    api_base: String,

    /// Hosts ending with this name get the credential token
    provider_host: String,
}

impl Default for StyleResolver {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROVIDER_SCHEME,
            DEFAULT_PROVIDER_API_BASE,
            DEFAULT_PROVIDER_HOST,
        )
    }
}

impl StyleResolver {
    /// Create a resolver for a specific provider.
    pub fn new(
        scheme: impl Into<String>,
        api_base: impl Into<String>,
        provider_host: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            provider_host: provider_host.into(),
        }
    }

    /// Whether `url` is served by the provider.
    pub fn is_provider_url(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| host_matches(host, &self.provider_host))
            .unwrap_or(false)
    }

    /// Resolve a style reference to an absolute descriptor URL.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed provider references, unparseable URLs and
    /// anything that is neither. Callers must treat this as a hard stop.
    pub fn resolve_style_url(
        &self,
        reference: &str,
        token: Option<&str>,
    ) -> Result<Url, StyleError> {
        let reference = reference.trim();

        if let Some(rest) = self.strip_scheme(reference) {
            let segments: Vec<&str> = rest.split('/').collect();
            let (owner, style) = match segments.as_slice() {
                ["styles", owner, style, ..] if !owner.is_empty() && !style.is_empty() => {
                    (*owner, *style)
                }
                _ => return Err(StyleError::MissingOwnerOrStyle(reference.to_string())),
            };

            let url = self.parse(&format!(
                "{}/styles/v1/{}/{}",
                self.api_base, owner, style
            ))?;
            return Ok(self.with_token(url, token));
        }

        if reference.starts_with("http://") || reference.starts_with("https://") {
            let url = self.parse(reference)?;
            return Ok(self.with_token(url, token));
        }

        Err(StyleError::UnsupportedReference(reference.to_string()))
    }

    /// Append the credential token when the host requires one and none is present.
    pub fn with_token(&self, mut url: Url, token: Option<&str>) -> Url {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => return url,
        };

        if !self.is_provider_url(&url) {
            return url;
        }

        let has_token = url.query_pairs().any(|(key, _)| key == ACCESS_TOKEN_PARAM);
        if !has_token {
            url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
        }
        url
    }

    /// Extract every tile URL template declared by the descriptor's sources.
    ///
    /// Templates come from each source's `tiles` array. Sources that only carry
    /// a provider-scheme `url` (a tileset reference) are expanded to the
    /// provider's tileset endpoint.
    pub fn tile_templates(&self, descriptor: &Value) -> Vec<String> {
        let mut templates = Vec::new();

        let sources = match descriptor.get("sources").and_then(Value::as_object) {
            Some(sources) => sources,
            None => return templates,
        };

        for (name, source) in sources {
            if let Some(tiles) = source.get("tiles").and_then(Value::as_array) {
                templates.extend(tiles.iter().filter_map(Value::as_str).map(String::from));
                continue;
            }

            let tileset = source
                .get("url")
                .and_then(Value::as_str)
                .and_then(|url| self.strip_scheme(url));

            match tileset {
                Some(ids) if !ids.is_empty() => {
                    let extension = match source.get("type").and_then(Value::as_str) {
                        Some("raster") => "png",
                        _ => "vector.pbf",
                    };
                    templates.push(format!(
                        "{}/v4/{}/{{z}}/{{x}}/{{y}}.{}",
                        self.api_base, ids, extension
                    ));
                }
                _ => debug!(source = %name, "Style source declares no tile templates"),
            }
        }

        templates
    }

    /// Derive the four sprite resource URLs from the descriptor's sprite base.
    ///
    /// Returns an empty list when the descriptor has no (usable) sprite.
    pub fn sprite_urls(&self, descriptor: &Value, token: Option<&str>) -> Vec<String> {
        let base = match descriptor.get("sprite").and_then(Value::as_str) {
            Some(base) => base,
            None => return Vec::new(),
        };

        let base_url = match self.sprite_base_url(base) {
            Ok(url) => url,
            Err(e) => {
                warn!(sprite = base, "Ignoring unusable sprite reference: {}", e);
                return Vec::new();
            }
        };

        SPRITE_SUFFIXES
            .iter()
            .map(|suffix| {
                let mut url = base_url.clone();
                let path = format!("{}{}", url.path(), suffix);
                url.set_path(&path);
                self.with_token(url, token).to_string()
            })
            .collect()
    }

    /// Substitute a tile coordinate into a template and attach the token.
    ///
    /// Returns `None` when the expanded template is not a valid URL.
    pub fn tile_url(
        &self,
        template: &str,
        tile: TileCoordinate,
        token: Option<&str>,
    ) -> Option<String> {
        let expanded = expand_template(template, tile);
        match Url::parse(&expanded) {
            Ok(url) => Some(self.with_token(url, token).to_string()),
            Err(e) => {
                debug!(template, "Skipping invalid tile template: {}", e);
                None
            }
        }
    }

    fn sprite_base_url(&self, base: &str) -> Result<Url, StyleError> {
        if let Some(rest) = self.strip_scheme(base) {
            let segments: Vec<&str> = rest.split('/').collect();
            return match segments.as_slice() {
                ["sprites", owner, style, version @ ..]
                    if !owner.is_empty() && !style.is_empty() =>
                {
                    // Versioned references keep their trailing segments before `/sprite`
                    let mut path = format!("{}/{}", owner, style);
                    for segment in version.iter().filter(|s| !s.is_empty()) {
                        path.push('/');
                        path.push_str(segment);
                    }
                    self.parse(&format!("{}/styles/v1/{}/sprite", self.api_base, path))
                }
                _ => Err(StyleError::MissingOwnerOrStyle(base.to_string())),
            };
        }

        if base.starts_with("http://") || base.starts_with("https://") {
            return self.parse(base);
        }

        Err(StyleError::UnsupportedReference(base.to_string()))
    }

    fn strip_scheme<'a>(&self, reference: &'a str) -> Option<&'a str> {
        reference
            .strip_prefix(self.scheme.as_str())
            .and_then(|rest| rest.strip_prefix("://"))
    }

    fn parse(&self, url: &str) -> Result<Url, StyleError> {
        Url::parse(url).map_err(|e| StyleError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Replace `{z}`, `{x}` and `{y}` placeholders with the tile's coordinates.
pub fn expand_template(template: &str, tile: TileCoordinate) -> String {
    template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

/// Suffix host match: `host` equals `name` or is a subdomain of it.
pub fn host_matches(host: &str, name: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let name = name.to_ascii_lowercase();
    host == name || host.ends_with(&format!(".{}", name))
}

// =============================================================================
// Tests
// =============================================================================
