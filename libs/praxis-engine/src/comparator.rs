/// Output Comparator - Policy-Driven Output Matching
///
/// **Core Responsibility:**
/// Decide whether an actual output matches an expected output under a
/// problem's whitespace policy.
///
/// **Critical Properties:**
/// - Knows nothing about processes, problems, or verdicts
/// - Pure and total: same bytes + policy always yield the same answer, and
///   no byte sequence (UTF-8 or not) can make it fail
/// - Empty expected output is a real expectation, not a wildcard: after
///   normalization the actual output must be empty too
use praxis_common::types::ComparePolicy;

/// Compare actual against expected output under the given policy.
pub fn compare(actual: &[u8], expected: &[u8], policy: &ComparePolicy) -> bool {
    normalize(actual, policy) == normalize(expected, policy)
}

/// Apply the policy's normalization steps and return the canonical bytes.
///
/// Line splitting is on `\n`; a `\r` left at the end of a line counts as
/// trailing whitespace, so CRLF output matches LF expectations under the
/// default policy.
pub fn normalize(raw: &[u8], policy: &ComparePolicy) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());

    for (i, line) in raw.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.push(b'\n');
        }

        let start = out.len();
        if policy.collapse_internal_whitespace {
            let mut in_run = false;
            for &b in line {
                if b == b' ' || b == b'\t' {
                    if !in_run {
                        out.push(b' ');
                        in_run = true;
                    }
                } else {
                    out.push(b);
                    in_run = false;
                }
            }
        } else {
            out.extend_from_slice(line);
        }

        if policy.trim_trailing_whitespace {
            while out.len() > start {
                match out.last() {
                    Some(b' ') | Some(b'\t') | Some(b'\r') => {
                        out.pop();
                    }
                    _ => break,
                }
            }
        }
    }

    if policy.trim_trailing_newlines {
        while out.last() == Some(&b'\n') {
            out.pop();
        }
    }

    out
}
