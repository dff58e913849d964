use std::collections::{HashMap, HashSet};

/// Where a node is in its polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
  /// Idle; a status check fires when the countdown reaches zero.
  Waiting(u64),
  /// Status check submitted, no answer yet.
  CheckInFlight,
  /// Node answered; assignment and collection for this round are running.
  RoundInFlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
  /// Submit a status check now.
  Due,
  Waiting(u64),
  /// A check or round is still outstanding.
  Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
  pub discovered: bool,
  pub action: TickAction,
}

#[derive(Debug)]
pub struct AvailabilityTracker {
  interval: u64,
  nodes: HashMap<String, Availability>,
}

impl AvailabilityTracker {
  pub fn new(interval: u64) -> Self {
    Self {
      interval: interval.max(1),
      nodes: HashMap::new(),
    }
  }

  pub fn tick(&mut self, name: &str) -> Tick {
    let discovered = !self.nodes.contains_key(name);
    let entry = self
      .nodes
      .entry(name.to_string())
      .or_insert(Availability::Waiting(1));

    let action = match *entry {
      Availability::Waiting(remaining) => {
        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
          *entry = Availability::CheckInFlight;
          TickAction::Due
        } else {
          *entry = Availability::Waiting(remaining);
          TickAction::Waiting(remaining)
        }
      }
      Availability::CheckInFlight | Availability::RoundInFlight => TickAction::Busy,
    };

    Tick { discovered, action }
  }

  /// The node answered its status check; its round is now running.
  pub fn begin_round(&mut self, name: &str) {
    if let Some(entry) = self.nodes.get_mut(name) {
      if *entry == Availability::CheckInFlight {
        *entry = Availability::RoundInFlight;
      }
    }
  }

  pub fn mark_available(&mut self, name: &str) {
    self
      .nodes
      .insert(name.to_string(), Availability::Waiting(self.interval));
  }

  /// Forgets idle nodes that are no longer enabled. Nodes with work in flight
  /// are kept until their round completes.
  pub fn retain(&mut self, enabled: &HashSet<&str>) {
    self.nodes.retain(|name, state| {
      enabled.contains(name.as_str()) || !matches!(state, Availability::Waiting(_))
    });
  }

  pub fn state(&self, name: &str) -> Option<Availability> {
    self.nodes.get(name).copied()
  }
}
