use std::collections::HashSet;

/// Whether a tool call reads or mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
}

/// Whether a tool call's effect is bounded to a known set of paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Confined,
    Unconfined,
}

/// A tool call annotated with the classification the dependency scheduler
/// needs: its read/write kind, its scope, and the paths it touches.
///
/// `paths == None` means the call carries no path information (a non-file
/// tool, or an unconfined one) and is treated as a read that never conflicts.
#[derive(Debug, Clone)]
pub struct Classified<T> {
    pub op_type: OpType,
    pub scope: Scope,
    pub paths: Option<Vec<String>>,
    pub call: T,
}

impl<T> Classified<T> {
    pub fn new(op_type: OpType, scope: Scope, paths: Option<Vec<String>>, call: T) -> Self {
        Self {
            op_type,
            scope,
            paths,
            call,
        }
    }

    fn is_unconfined_write(&self) -> bool {
        matches!((self.scope, self.op_type), (Scope::Unconfined, OpType::Write))
    }
}

/// Group an ordered list of classified tool calls into batches of
/// mutually-independent calls.
///
/// - Calls within a batch may run concurrently.
/// - `flatten(schedule(calls)) == calls` (order preserved).
/// - An unconfined write is always the sole member of its batch (barrier).
/// - A confined write conflicts with anything in the current batch that
///   touches one of its paths; a read only conflicts with a prior write on
///   one of its paths (read-after-write).
pub fn schedule<T>(calls: Vec<Classified<T>>) -> Vec<Vec<Classified<T>>> {
    let mut batches: Vec<Vec<Classified<T>>> = Vec::new();
    let mut current: Vec<Classified<T>> = Vec::new();
    // Every path touched (read or write) by the current batch.
    let mut touched: HashSet<String> = HashSet::new();
    // Paths written by the current batch.
    let mut written: HashSet<String> = HashSet::new();

    for c in calls {
        if c.is_unconfined_write() {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                touched.clear();
                written.clear();
            }
            batches.push(vec![c]);
            continue;
        }

        if !current.is_empty() {
            let conflict = match c.op_type {
                OpType::Write => c
                    .paths
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .any(|p| touched.contains(p)),
                OpType::Read => c
                    .paths
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .any(|p| written.contains(p)),
            };
            if conflict {
                batches.push(std::mem::take(&mut current));
                touched.clear();
                written.clear();
            }
        }

        if let Some(paths) = &c.paths {
            for p in paths {
                touched.insert(p.clone());
                if c.op_type == OpType::Write {
                    written.insert(p.clone());
                }
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &str, tag: &'static str) -> Classified<&'static str> {
        Classified::new(OpType::Read, Scope::Confined, Some(vec![path.to_string()]), tag)
    }

    fn write(path: &str, tag: &'static str) -> Classified<&'static str> {
        Classified::new(OpType::Write, Scope::Confined, Some(vec![path.to_string()]), tag)
    }

    fn unconfined(tag: &'static str) -> Classified<&'static str> {
        Classified::new(OpType::Write, Scope::Unconfined, None, tag)
    }

    fn tags(batches: &[Vec<Classified<&'static str>>]) -> Vec<Vec<&'static str>> {
        batches
            .iter()
            .map(|b| b.iter().map(|c| c.call).collect())
            .collect()
    }

    #[test]
    fn parallel_reads_form_one_batch() {
        let calls = vec![read("/a", "ra"), read("/b", "rb"), read("/c", "rc")];
        let batches = schedule(calls);
        assert_eq!(tags(&batches), vec![vec!["ra", "rb", "rc"]]);
    }

    #[test]
    fn read_then_write_same_path_splits() {
        let calls = vec![read("/a", "ra"), write("/a", "wa")];
        let batches = schedule(calls);
        assert_eq!(tags(&batches), vec![vec!["ra"], vec!["wa"]]);
    }

    #[test]
    fn unconfined_call_is_a_barrier() {
        let calls = vec![
            read("/a", "ra"),
            read("/b", "rb"),
            unconfined("bash"),
            read("/c", "rc"),
            read("/d", "rd"),
        ];
        let batches = schedule(calls);
        assert_eq!(
            tags(&batches),
            vec![vec!["ra", "rb"], vec!["bash"], vec!["rc", "rd"]]
        );
    }

    #[test]
    fn complex_mix_matches_scenario() {
        let calls = vec![
            read("/a", "r1"),
            read("/b", "r2"),
            read("/c", "r3"),
            write("/a", "w1"),
            read("/a", "r4"),
            read("/d", "r5"),
            read("/e", "r6"),
            unconfined("bash"),
            read("/f", "r7"),
            read("/g", "r8"),
        ];
        let batches = schedule(calls);
        assert_eq!(
            tags(&batches),
            vec![
                vec!["r1", "r2", "r3"],
                vec!["w1"],
                vec!["r4", "r5", "r6"],
                vec!["bash"],
                vec!["r7", "r8"],
            ]
        );
    }

    #[test]
    fn flatten_preserves_input_order() {
        let input = vec![
            read("/a", "r1"),
            write("/a", "w1"),
            unconfined("bash"),
            read("/z", "r2"),
        ];
        let expected: Vec<&'static str> = input.iter().map(|c| c.call).collect();
        let batches = schedule(input);
        let flattened: Vec<&'static str> = batches.iter().flatten().map(|c| c.call).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn non_file_tool_never_conflicts() {
        let db_query = Classified::new(OpType::Read, Scope::Confined, None, "query_db");
        let calls = vec![write("/a", "w1"), db_query, read("/a", "r1")];
        let batches = schedule(calls);
        // the db query has no paths, so it never conflicts and rides along
        // with whatever batch it lands in; the read-after-write on /a still
        // forces a new batch.
        assert_eq!(tags(&batches), vec![vec!["w1", "query_db"], vec!["r1"]]);
    }

    #[test]
    fn unconfined_write_is_always_solo() {
        for batch in schedule(vec![unconfined("bash")]) {
            assert_eq!(batch.len(), 1);
        }
        let calls = vec![unconfined("a"), unconfined("b")];
        let batches = schedule(calls);
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.len(), 1);
        }
    }
}
