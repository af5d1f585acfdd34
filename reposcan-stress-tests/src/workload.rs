use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Results,
    Queue,
}

/// Workload profiles controlling the mix of operations issued against the cluster.
///
/// | Profile    | Results % | Queue % |
/// |------------|-----------|---------|
/// | ReadHeavy  |    90     |   10    |
/// | Balanced   |    60     |   40    |
/// | WriteHeavy |    20     |   80    |
/// | QueueOnly  |     0     |  100    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadProfile {
    ReadHeavy,
    Balanced,
    WriteHeavy,
    QueueOnly,
}

impl WorkloadProfile {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "read-heavy" => Some(Self::ReadHeavy),
            "balanced" => Some(Self::Balanced),
            "write-heavy" => Some(Self::WriteHeavy),
            "queue-only" => Some(Self::QueueOnly),
            _ => None,
        }
    }

    pub fn as_name(&self) -> &'static str {
        match self {
            Self::ReadHeavy => "read-heavy",
            Self::Balanced => "balanced",
            Self::WriteHeavy => "write-heavy",
            Self::QueueOnly => "queue-only",
        }
    }

    /// Draw a random operation using `rng`.
    pub fn sample(&self, rng: &mut impl Rng) -> Op {
        let roll: u32 = rng.gen_range(0..100);
        self.op_for_roll(roll)
    }

    /// Map a roll in `0..100` to an `Op` according to the profile's percentages.
    /// Exposed for deterministic testing.
    pub fn op_for_roll(&self, roll: u32) -> Op {
        match self {
            Self::ReadHeavy => if roll < 90 { Op::Results } else { Op::Queue },
            Self::Balanced => if roll < 60 { Op::Results } else { Op::Queue },
            Self::WriteHeavy => if roll < 20 { Op::Results } else { Op::Queue },
            Self::QueueOnly => Op::Queue,
        }
    }
}
