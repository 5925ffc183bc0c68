#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineDelta {
    pub added: u64,
    pub removed: u64,
}

impl LineDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Counts inserted and removed lines between two versions using the length
/// of their longest common subsequence. Shared prefix and suffix are peeled
/// off first and the table keeps a single row.
pub fn line_delta(old: &[&str], new: &[&str]) -> LineDelta {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let old_rest = &old[prefix..];
    let new_rest = &new[prefix..];
    let suffix = old_rest
        .iter()
        .rev()
        .zip(new_rest.iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old_rest[..old_rest.len() - suffix];
    let new_mid = &new_rest[..new_rest.len() - suffix];

    let common = lcs_len(old_mid, new_mid);
    LineDelta {
        added: (new_mid.len() - common) as u64,
        removed: (old_mid.len() - common) as u64,
    }
}

fn lcs_len(a: &[&str], b: &[&str]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (outer, inner) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut row = vec![0usize; inner.len() + 1];
    for left in outer {
        let mut diagonal = 0;
        for (j, right) in inner.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if left == right {
                diagonal + 1
            } else {
                above.max(row[j])
            };
            diagonal = above;
        }
    }
    row[inner.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(old: &str, new: &str) -> (u64, u64) {
        let old: Vec<&str> = old.lines().collect();
        let new: Vec<&str> = new.lines().collect();
        let found = line_delta(&old, &new);
        (found.added, found.removed)
    }

    #[test]
    fn new_file_counts_every_line_as_added() {
        assert_eq!(delta("", "first\nsecond\n"), (2, 0));
        assert_eq!(delta("a\nb\n", ""), (0, 2));
    }

    #[test]
    fn replaced_line_is_one_add_one_remove() {
        assert_eq!(delta("first\nsecond\n", "first\nthird\n"), (1, 1));
        assert_eq!(delta("a\nb\nc\n", "a\nb\nc\n"), (0, 0));
    }

    #[test]
    fn interleaved_edits_use_the_common_subsequence() {
        assert_eq!(delta("a\nb\nc\nd\ne\n", "a\nx\nc\ne\ny\n"), (2, 2));
        assert_eq!(delta("a\nb\n", "b\na\n"), (1, 1));
        assert_eq!(delta("x\nx\nx\n", "x\nx\n"), (0, 1));
    }
}
