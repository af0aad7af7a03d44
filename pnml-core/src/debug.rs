//! The debug driver (C5): owns one engine plus breakpoints, history, and a
//! step counter, and exposes the line-oriented stepping operations the
//! protocol shim (C6) sits on top of.

use std::collections::BTreeSet;

use crate::engine::{Engine, StepOutcome};
use crate::error::{InscriptionError, ParseError};
use crate::parser::{find_place_for_line, parse};
use crate::registry::Registry;
use crate::types::{HistoryEntry, Net, PlaceIndex};

pub struct DebugDriver {
    net: Option<std::sync::Arc<Net>>,
    place_index: Vec<PlaceIndex>,
    place_line_map: std::collections::BTreeMap<String, usize>,
    engine: Option<Engine>,
    breakpoints: BTreeSet<String>,
    history: Vec<HistoryEntry>,
    step_counter: usize,
    /// The most recent sync-expression failure, if any. Per spec §7 the
    /// failure propagates "outward to the caller of `step_once`"; since
    /// `HistoryEntry` carries no error field, callers (the protocol shim)
    /// pull it separately via [`DebugDriver::take_last_error`] after a
    /// `continue_run`/`step_once` call.
    last_error: Option<InscriptionError>,
}

impl Default for DebugDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugDriver {
    pub fn new() -> Self {
        Self {
            net: None,
            place_index: Vec::new(),
            place_line_map: std::collections::BTreeMap::new(),
            engine: None,
            breakpoints: BTreeSet::new(),
            history: Vec::new(),
            step_counter: 0,
            last_error: None,
        }
    }

    /// Takes (and clears) the most recent sync-expression failure, if any.
    pub fn take_last_error(&mut self) -> Option<InscriptionError> {
        self.last_error.take()
    }

    /// Parses `text`, builds a fresh engine over it, and resets breakpoints,
    /// history, and the step counter.
    pub fn load(&mut self, text: &str, registry: Registry) -> Result<(), ParseError> {
        let (net, place_index) = parse(text)?;
        self.place_line_map = place_index
            .iter()
            .filter_map(|p| p.id.clone().map(|id| (id, p.id_line)))
            .collect();
        self.place_index = place_index;
        let engine = Engine::new(net, registry);
        self.net = Some(engine.net());
        self.engine = Some(engine);
        self.breakpoints.clear();
        self.history.clear();
        self.step_counter = 0;
        self.last_error = None;
        Ok(())
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn place_index(&self) -> &[PlaceIndex] {
        &self.place_index
    }

    /// Maps each given (1-based-or-0-based, as the caller defines) line to a
    /// place via [`find_place_for_line`] and stores the resulting place-id
    /// set. Returns the lines back, unchanged, matching
    /// `enginepy/pnml_engine.py`'s `set_breakpoints_by_lines`.
    pub fn set_breakpoints(&mut self, lines: &[usize]) -> Vec<usize> {
        self.breakpoints.clear();
        for &line in lines {
            if let Some(place) = self.find_place_for_line(line) {
                if let Some(id) = place.id {
                    self.breakpoints.insert(id);
                }
            }
        }
        lines.to_vec()
    }

    pub fn find_place_for_line(&self, line: usize) -> Option<PlaceIndex> {
        find_place_for_line(&self.place_index, line)
    }

    fn produced_places(&self, transition_id: &str) -> Vec<String> {
        let Some(net) = &self.net else { return Vec::new() };
        net.arcs
            .iter()
            .filter(|arc| arc.source.as_deref() == Some(transition_id) && arc.target.as_ref().map(|t| net.places.contains_key(t)).unwrap_or(false))
            .filter_map(|arc| arc.target.clone())
            .collect()
    }

    /// Drives the engine until a breakpoint is hit, a non-completed pending
    /// op is returned, or nothing is left enabled.
    pub fn continue_run(&mut self) -> Option<HistoryEntry> {
        let engine = self.engine.clone()?;
        loop {
            match engine.step_once() {
                StepOutcome::None => return None,
                StepOutcome::Pending(pending) => {
                    if !pending.completed {
                        let entry = HistoryEntry {
                            step: self.step_counter,
                            transition_id: Some(pending.transition_id.clone()),
                            line: None,
                            produced_places: Vec::new(),
                        };
                        self.history.push(entry.clone());
                        return Some(entry);
                    }
                    self.step_counter += 1;
                    let produced = self.produced_places(&pending.transition_id);
                    let entry = HistoryEntry {
                        step: self.step_counter,
                        transition_id: Some(pending.transition_id.clone()),
                        line: None,
                        produced_places: produced,
                    };
                    self.history.push(entry);
                    continue;
                }
                StepOutcome::Fired(transition_id) => {
                    self.step_counter += 1;
                    let produced = self.produced_places(&transition_id);
                    let stop_place = produced.iter().find(|p| self.breakpoints.contains(*p)).cloned();
                    let stop_line = stop_place.as_ref().and_then(|p| self.place_line_map.get(p).copied());
                    let entry = HistoryEntry {
                        step: self.step_counter,
                        transition_id: Some(transition_id),
                        line: stop_line,
                        produced_places: produced,
                    };
                    self.history.push(entry.clone());
                    if stop_place.is_some() {
                        return Some(entry);
                    }
                    continue;
                }
                StepOutcome::Error(err) => {
                    self.step_counter += 1;
                    let entry = HistoryEntry {
                        step: self.step_counter,
                        transition_id: Some(err.transition_id.clone()),
                        line: None,
                        produced_places: Vec::new(),
                    };
                    self.history.push(entry.clone());
                    self.last_error = Some(err);
                    return Some(entry);
                }
            }
        }
    }

    /// Fires the engine exactly once, appending one history entry
    /// regardless of whether a breakpoint was hit.
    pub fn step_once(&mut self) -> Option<HistoryEntry> {
        let engine = self.engine.clone()?;
        match engine.step_once() {
            StepOutcome::None => None,
            StepOutcome::Pending(pending) => {
                let entry = HistoryEntry {
                    step: self.step_counter,
                    transition_id: Some(pending.transition_id),
                    line: None,
                    produced_places: Vec::new(),
                };
                self.history.push(entry.clone());
                Some(entry)
            }
            StepOutcome::Fired(transition_id) => {
                self.step_counter += 1;
                let produced = self.produced_places(&transition_id);
                let entry = HistoryEntry {
                    step: self.step_counter,
                    transition_id: Some(transition_id),
                    line: None,
                    produced_places: produced,
                };
                self.history.push(entry.clone());
                Some(entry)
            }
            StepOutcome::Error(err) => {
                self.step_counter += 1;
                let entry = HistoryEntry {
                    step: self.step_counter,
                    transition_id: Some(err.transition_id.clone()),
                    line: None,
                    produced_places: Vec::new(),
                };
                self.history.push(entry.clone());
                self.last_error = Some(err);
                Some(entry)
            }
        }
    }
}
