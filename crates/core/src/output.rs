/// Output buffer assembled from streamed `update` fragments.
#[derive(Debug, Clone, Default)]
pub struct OutputAccumulator {
    buf: String,
    fragments: usize,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.fragments = 0;
    }

    pub fn append(&mut self, fragment: &str) {
        self.buf.push_str(fragment);
        self.fragments += 1;
    }

    pub fn value(&self) -> &str {
        &self.buf
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_arrival_order() {
        let mut out = OutputAccumulator::new();
        out.append("Bon");
        out.append("jour");
        out.append(" le monde");

        assert_eq!(out.value(), "Bonjour le monde");
        assert_eq!(out.fragments(), 3);
    }

    #[test]
    fn reset_then_replay_reproduces_live_output() {
        let recorded = ["J'", "aime ", "promener ", "mon ", "chien", "."];

        let mut live = OutputAccumulator::new();
        live.append("stale text from an earlier request");
        live.reset();
        for f in recorded {
            live.append(f);
        }

        let mut replay = OutputAccumulator::new();
        replay.reset();
        for f in recorded {
            replay.append(f);
        }

        assert_eq!(replay.value(), live.value());
        assert_eq!(replay.value(), recorded.concat());
    }

    #[test]
    fn empty_fragments_are_counted_but_add_nothing() {
        let mut out = OutputAccumulator::new();
        out.append("");
        assert_eq!(out.value(), "");
        assert_eq!(out.fragments(), 1);
    }
}
