//! The contribution-source API other mods implement to add tooltip content.

pub mod custom_data;

use crate::error::ProviderError;
use crate::protocol::ItemVisualOverrides;

/// Standard priority constants for [`TooltipProvider::priority`].
///
/// Providers are rendered in ascending priority order: lower values appear
/// closer to the original item description. For destructive overrides
/// (name/description), the highest-priority provider wins.
pub mod priority {
    /// Rendered closest to the original description.
    pub const FIRST: i32 = 0;
    /// Rendered before default providers.
    pub const EARLY: i32 = 50;
    /// Standard priority.
    pub const DEFAULT: i32 = 100;
    /// Rendered after default providers.
    pub const LATE: i32 = 150;
    /// Rendered furthest from the original description.
    pub const LAST: i32 = 200;
    /// Reserved for providers whose sole purpose is a destructive name or
    /// description override.
    pub const OVERRIDE: i32 = 999;
}

/// Standard metadata keys read by the built-in
/// [`custom_data::CustomDataTooltipProvider`]. Any mod can write these into
/// an item's metadata JSON and get tooltips without registering a provider.
pub mod keys {
    /// A custom display name (JSON string). Name override at priority LAST.
    pub const CUSTOM_NAME: &str = "dtt_name";
    /// Custom additive lines (JSON array of strings), appended after all
    /// other providers' lines.
    pub const CUSTOM_LINES: &str = "dtt_lines";
}

/// A unit of tooltip logic registered with the engine.
///
/// `tooltip_data` is called on every outbound inventory snapshot for every
/// occupied slot. Implementations must be thread-safe, fast, and must not
/// block. Return `Ok(None)` for items the provider does not care about; an
/// `Err` is logged by the engine and treated as no contribution.
pub trait TooltipProvider: Send + Sync {
    /// Unique id, used for logging and [`unregister`](crate::TooltipEngine::unregister_provider).
    fn provider_id(&self) -> &str;

    /// Rendering priority; see [`priority`].
    fn priority(&self) -> i32;

    /// Returns this provider's contribution for `(item_id, metadata)`.
    ///
    /// `metadata` is the instance's opaque state blob; parsing it is
    /// entirely this provider's concern. `locale` is the observer's
    /// language tag when known.
    fn tooltip_data(
        &self,
        item_id: &str,
        metadata: Option<&str>,
        locale: Option<&str>,
    ) -> Result<Option<TooltipData>, ProviderError>;
}

/// One provider's contribution to an item's tooltip.
///
/// Three modes compose across providers:
/// - additive `lines` concatenate in priority order;
/// - `name_override` replaces the display name (highest priority wins);
/// - `description_override` replaces the entire description, discarding
///   all additive lines (highest priority wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TooltipData {
    pub lines: Vec<String>,
    pub name_override: Option<String>,
    pub description_override: Option<String>,
    pub visual_overrides: Option<ItemVisualOverrides>,
    /// Deterministic string combined into the virtual-id hash. Must be
    /// stable for identical logical item state, e.g. `"sharpness:3"`.
    pub stable_hash_input: String,
}

impl TooltipData {
    pub fn builder() -> TooltipDataBuilder {
        TooltipDataBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
            && self.name_override.is_none()
            && self.description_override.is_none()
            && self.visual_overrides.is_none()
    }
}

#[derive(Debug, Default)]
pub struct TooltipDataBuilder {
    data: TooltipData,
}

impl TooltipDataBuilder {
    pub fn add_line(mut self, line: impl Into<String>) -> Self {
        self.data.lines.push(line.into());
        self
    }

    pub fn add_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Destructive: the highest-priority provider's name wins.
    pub fn name_override(mut self, name: impl Into<String>) -> Self {
        self.data.name_override = Some(name.into());
        self
    }

    /// Destructive: replaces the entire description, including all
    /// additive lines from every provider.
    pub fn description_override(mut self, description: impl Into<String>) -> Self {
        self.data.description_override = Some(description.into());
        self
    }

    pub fn visual_overrides(mut self, overrides: ItemVisualOverrides) -> Self {
        self.data.visual_overrides = Some(overrides);
        self
    }

    /// Required. Must be deterministic for the same item state.
    pub fn hash_input(mut self, input: impl Into<String>) -> Self {
        self.data.stable_hash_input = input.into();
        self
    }

    pub fn build(self) -> TooltipData {
        self.data
    }
}
