use super::{EventKind, FeedEvent, GreeksEvent, QuoteEvent};
use std::collections::{BTreeSet, HashMap};

/// Latest event per requested symbol, gathered by one collection.
///
/// A snapshot may be partial; [`CollectedSnapshot::missing`] lists the
/// requested symbols that received nothing before the deadline.
#[derive(Debug, Clone)]
pub struct CollectedSnapshot {
    kind: EventKind,
    requested: BTreeSet<String>,
    events: HashMap<String, FeedEvent>,
}

impl CollectedSnapshot {
    /// Creates an empty snapshot for the requested symbols.
    pub fn new(kind: EventKind, requested: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind,
            requested: requested.into_iter().collect(),
            events: HashMap::new(),
        }
    }

    /// Stores an event, replacing any earlier one for the same symbol.
    ///
    /// Events of another kind or for symbols that were not requested are
    /// ignored. Returns true if the event was stored.
    pub fn record(&mut self, event: FeedEvent) -> bool {
        if event.kind() != self.kind || !self.requested.contains(event.symbol()) {
            return false;
        }
        self.events.insert(event.symbol().to_string(), event);
        true
    }

    /// Event kind collected.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Requested symbols.
    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    /// Latest event for a symbol.
    pub fn get(&self, symbol: &str) -> Option<&FeedEvent> {
        self.events.get(symbol)
    }

    /// Latest quote for a symbol.
    pub fn quote(&self, symbol: &str) -> Option<&QuoteEvent> {
        match self.events.get(symbol) {
            Some(FeedEvent::Quote(q)) => Some(q),
            _ => None,
        }
    }

    /// Latest greeks for a symbol.
    pub fn greeks(&self, symbol: &str) -> Option<&GreeksEvent> {
        match self.events.get(symbol) {
            Some(FeedEvent::Greeks(g)) => Some(g),
            _ => None,
        }
    }

    /// Collected events, in no particular order.
    pub fn events(&self) -> impl Iterator<Item = &FeedEvent> {
        self.events.values()
    }

    /// Requested symbols without an event, sorted.
    pub fn missing(&self) -> Vec<&str> {
        self.requested
            .iter()
            .filter(|s| !self.events.contains_key(s.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Returns true when every requested symbol has an event.
    pub fn is_complete(&self) -> bool {
        self.events.len() == self.requested.len()
    }

    /// Number of symbols with an event.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true when no event was collected.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
