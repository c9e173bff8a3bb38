//! Quality-scored matching of channel properties against client filters.
//!
//! A client declares interest with a list of [`ChannelFilter`]s. Each filter
//! is a set of required property values; a channel matches a filter when it
//! carries every required value. The match quality is the filter size plus
//! one, so more specific filters outrank broader ones and the empty filter
//! matches everything with quality 1. A quality of 0 means "no match".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::properties::{PropertyMap, PropertyValue, keys};

/// Match quality; zero means the channel does not match.
pub type Quality = u32;

/// A set of property values a channel must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelFilter {
    required: BTreeMap<String, PropertyValue>,
}

impl ChannelFilter {
    /// Creates the empty filter, which matches every channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style addition of a required property.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.required.insert(key.into(), value.into());
        self
    }

    /// Number of required properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.required.len()
    }

    /// Returns `true` for the match-everything filter.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Quality awarded when this filter matches.
    #[must_use]
    pub fn quality(&self) -> Quality {
        Quality::try_from(self.required.len())
            .unwrap_or(Quality::MAX)
            .saturating_add(1)
    }

    /// Iterates over required properties.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> + '_ {
        self.required.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns `true` when `properties` satisfies every requirement.
    ///
    /// With `assume_requested`, a `Requested` requirement is satisfied only
    /// by `true` and the channel's own value is never consulted.
    #[must_use]
    pub fn accepts(&self, properties: &PropertyMap, assume_requested: bool) -> bool {
        self.required.iter().all(|(key, wanted)| {
            if assume_requested && key == keys::REQUESTED {
                return wanted.as_bool() == Some(true);
            }
            properties
                .get(key)
                .is_some_and(|actual| actual.matches(wanted))
        })
    }
}

/// Scores `properties` against `filters`, returning the best quality or 0.
///
/// The result depends only on the set of filters, not their order.
#[must_use]
pub fn match_filters(
    properties: &PropertyMap,
    filters: &[ChannelFilter],
    assume_requested: bool,
) -> Quality {
    filters
        .iter()
        .filter(|filter| filter.accepts(properties, assume_requested))
        .map(ChannelFilter::quality)
        .max()
        .unwrap_or(0)
}
