//! Descriptor registry and best-match selection.
//!
//! Registration order is significant: candidates are sorted by score with a
//! stable sort, so among equal scores the earlier registration wins.  The
//! same file against the same registry always selects the same descriptor.

use std::sync::Arc;

use crate::descriptor::{self, Descriptor, DescriptorRef, Probe};

struct Entry {
    descriptor: DescriptorRef,
    enabled:    bool,
}

/// One scored descriptor.
#[derive(Clone)]
pub struct Candidate {
    pub descriptor: DescriptorRef,
    pub score:      u32,
    pub breakdown:  Vec<(&'static str, u32)>,
    /// Registration index, kept for diagnostics.
    pub order:      usize,
}

impl Candidate {
    pub fn id(&self) -> &'static str {
        self.descriptor.info().id
    }
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id())
            .field("score", &self.score)
            .field("order", &self.order)
            .finish()
    }
}

#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Append a descriptor.  Its `enabled` flag seeds the registry state.
    pub fn register<D: Descriptor + 'static>(&mut self, descriptor: D) -> &mut Self {
        self.register_arc(Arc::new(descriptor))
    }

    pub fn register_arc(&mut self, descriptor: DescriptorRef) -> &mut Self {
        let enabled = descriptor.info().enabled;
        self.entries.push(Entry { descriptor, enabled });
        self
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, id: &str) -> Option<DescriptorRef> {
        self.entries
            .iter()
            .find(|e| e.descriptor.info().id.eq_ignore_ascii_case(id))
            .map(|e| Arc::clone(&e.descriptor))
    }

    /// Returns false when no descriptor has that id.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.descriptor.info().id.eq_ignore_ascii_case(id)) {
            Some(e) => { e.enabled = enabled; true }
            None    => false,
        }
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.enabled && e.descriptor.info().id.eq_ignore_ascii_case(id))
    }

    /// All descriptors with their enabled state, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&DescriptorRef, bool)> {
        self.entries.iter().map(|e| (&e.descriptor, e.enabled))
    }

    /// Score every enabled descriptor against `probe`, best first.
    pub fn rank(&self, probe: &mut Probe) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.enabled)
            .map(|(order, e)| {
                let rating = descriptor::rate(e.descriptor.as_ref(), probe);
                log::trace!("{}: {} {:?}", e.descriptor.info().id, rating.total(), rating.breakdown());
                Candidate {
                    descriptor: Arc::clone(&e.descriptor),
                    score:      rating.total(),
                    breakdown:  rating.breakdown().to_vec(),
                    order,
                }
            })
            .collect();
        // Stable: equal scores keep registration order.
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates
    }

    /// Candidates that reach `min_score`, best first.
    pub fn viable(&self, probe: &mut Probe, min_score: u32) -> Vec<Candidate> {
        let mut ranked = self.rank(probe);
        ranked.retain(|c| c.score >= min_score && c.score > 0);
        ranked
    }

    /// The single best candidate, if any reaches `min_score`.
    pub fn select_best(&self, probe: &mut Probe, min_score: u32) -> Option<Candidate> {
        let best = self.viable(probe, min_score).into_iter().next();
        match &best {
            Some(c) => log::debug!("{}: selected {} (score {})", probe.path().display(), c.id(), c.score),
            None    => log::debug!("{}: no descriptor reached {min_score}", probe.path().display()),
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        weight, Capabilities, DescriptorInfo, ParseError, ProbeError, Rating, ReadContext,
    };
    use crate::resource::Resource;

    /// Awards a fixed score to anything.
    struct Fixed(&'static DescriptorInfo, u32);

    impl Descriptor for Fixed {
        fn info(&self) -> &DescriptorInfo { self.0 }
        fn score(&self, _: &mut Probe, rating: &mut Rating) -> Result<(), ProbeError> {
            rating.add("fixed", self.1);
            Ok(())
        }
        fn read(&self, _: &mut ReadContext<'_>) -> Result<Vec<Resource>, ParseError> {
            Ok(Vec::new())
        }
    }

    macro_rules! info {
        ($name:ident, $id:literal) => {
            static $name: DescriptorInfo = DescriptorInfo {
                id: $id, name: $id, games: &[], extensions: &[],
                capabilities: Capabilities::READ_ONLY, enabled: true,
            };
        };
    }
    info!(A, "a");
    info!(B, "b");
    info!(C, "c");

    fn probe() -> Probe {
        Probe::from_bytes("x.bin", vec![0u8; 16]).unwrap()
    }

    #[test]
    fn ties_keep_registration_order() {
        let mut reg = Registry::new();
        reg.register(Fixed(&A, 30)).register(Fixed(&B, 60)).register(Fixed(&C, 60));
        let ranked = reg.rank(&mut probe());
        let ids: Vec<_> = ranked.iter().map(Candidate::id).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        for _ in 0..10 {
            assert_eq!(reg.select_best(&mut probe(), 25).unwrap().id(), "b");
        }
    }

    #[test]
    fn threshold_and_disable() {
        let mut reg = Registry::new();
        reg.register(Fixed(&A, weight::FIELD)).register(Fixed(&B, weight::MAGIC));
        assert_eq!(reg.viable(&mut probe(), 25).len(), 1);
        assert!(reg.set_enabled("B", false));
        assert!(!reg.is_enabled("b"));
        assert!(reg.select_best(&mut probe(), 25).is_none());
        assert!(!reg.set_enabled("zzz", true));
        assert_eq!(reg.iter().filter(|(_, on)| *on).count(), 1);
    }

    #[test]
    fn zero_score_is_never_viable() {
        let mut reg = Registry::new();
        reg.register(Fixed(&A, 0));
        assert!(reg.viable(&mut probe(), 0).is_empty());
    }
}
