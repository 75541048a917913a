use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::category::Platform;
use crate::sample::{Capture, Frame, Stack, ThreadId};

const FUNCTION_VOCABULARY: [&str; 9] = [
    "main",
    "run_app",
    "process_request",
    "handle_data",
    "calculate_result",
    "compute_value",
    "update_cache",
    "format_response",
    "send_result",
];
const MIN_STACK_DEPTH: usize = 3;
const MAX_STACK_DEPTH: usize = 7;

/// Produces synthetic call stacks with a valid schema shape.
///
/// Every call returns a fresh stack id; stacks are never shared between
/// captures.
#[derive(Debug)]
pub struct StackSynthesizer {
    rng: StdRng,
    extension: &'static str,
}

impl StackSynthesizer {
    pub fn new(platform: &Platform, seed: Option<u64>) -> Self {
        Self {
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            extension: platform.source_extension(),
        }
    }

    pub fn generate_sample(&mut self, thread_id: &str) -> Capture {
        let depth = self.rng.gen_range(MIN_STACK_DEPTH..=MAX_STACK_DEPTH);
        let functions: Vec<&str> = FUNCTION_VOCABULARY
            .choose_multiple(&mut self.rng, depth)
            .copied()
            .collect();

        let frames = functions
            .into_iter()
            .map(|function| {
                let path = format!("/app/src/{}.{}", function.replace('_', "/"), self.extension);
                Frame {
                    function: function.to_owned(),
                    file_path: path,
                    line: self.rng.gen_range(10..=500),
                    module: format!("app.{}", function.replace('_', ".")),
                    is_application_code: true,
                }
            })
            .collect();

        Capture {
            thread_id: ThreadId::from(thread_id),
            stack: Arc::new(Stack {
                id: crate::serialization::random_id(&mut self.rng),
                frames,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_stack_shape() {
        let mut synthesizer = StackSynthesizer::new(&Platform::new("python"), Some(1));
        for _ in 0..200 {
            let capture = synthesizer.generate_sample("42");
            assert_eq!(capture.thread_id, "42");

            let frames = &capture.stack.frames;
            assert!((MIN_STACK_DEPTH..=MAX_STACK_DEPTH).contains(&frames.len()));

            let names: HashSet<&str> = frames.iter().map(|f| f.function.as_str()).collect();
            assert_eq!(names.len(), frames.len(), "functions are drawn without replacement");

            for frame in frames {
                assert!(frame.is_application_code);
                assert!((10..=500).contains(&frame.line));
                assert!(frame.file_path.starts_with("/app/src/"));
                assert!(frame.file_path.ends_with(".py"));
            }
        }
    }

    #[test]
    fn test_paths_and_modules() {
        let mut synthesizer = StackSynthesizer::new(&Platform::new("javascript"), Some(3));
        let capture = synthesizer.generate_sample("1");
        for frame in &capture.stack.frames {
            let expected_path = format!("/app/src/{}.js", frame.function.replace('_', "/"));
            assert_eq!(frame.file_path, expected_path);
            assert_eq!(frame.module, format!("app.{}", frame.function.replace('_', ".")));
        }
    }

    #[test]
    fn test_fresh_stack_id_every_call() {
        let mut synthesizer = StackSynthesizer::new(&Platform::new("python"), Some(5));
        let ids: HashSet<String> = (0..500)
            .map(|_| synthesizer.generate_sample("1").stack.id.clone())
            .collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_seeded_synthesizers_agree() {
        let mut a = StackSynthesizer::new(&Platform::new("python"), Some(9));
        let mut b = StackSynthesizer::new(&Platform::new("python"), Some(9));
        assert_eq!(a.generate_sample("1"), b.generate_sample("1"));
    }
}
