use gavel::compare::outputs_match;

// ---------------------------------------------------------------------------
// Stage 1: normalized direct equality
// ---------------------------------------------------------------------------

#[test]
fn identical_outputs_match() {
    assert!(outputs_match("42", "42"));
}

#[test]
fn trailing_newlines_are_ignored() {
    assert!(outputs_match("42\n", "42"));
    assert!(outputs_match("42", "42\n\n"));
}

#[test]
fn crlf_normalizes_to_lf() {
    assert!(outputs_match("1\r\n2\r\n", "1\n2"));
    assert!(outputs_match("1\r2", "1\n2"));
}

#[test]
fn comparison_is_reflexive_and_stable() {
    let samples = ["", "x", "1 2 3", "a\nb\nc", "3.14159"];
    for s in samples {
        assert!(outputs_match(s, s), "reflexivity failed for {s:?}");
        // Idempotence: repeated comparison gives the same answer.
        assert_eq!(outputs_match(s, "other"), outputs_match(s, "other"));
    }
}

// ---------------------------------------------------------------------------
// Stage 2: token comparison
// ---------------------------------------------------------------------------

#[test]
fn interior_whitespace_differences_match() {
    assert!(outputs_match("1  2   3", "1 2 3"));
    assert!(outputs_match("  1 2\n 3 4 ", "1 2\n3 4"));
}

#[test]
fn empty_lines_are_dropped() {
    assert!(outputs_match("1\n\n2\n", "1\n2"));
}

#[test]
fn different_tokens_do_not_match() {
    assert!(!outputs_match("1 2", "1 3"));
    assert!(!outputs_match("hello", "world"));
}

#[test]
fn different_line_counts_do_not_match() {
    assert!(!outputs_match("1\n2\n3", "1\n2"));
}

// ---------------------------------------------------------------------------
// Stage 3: numeric tolerance
// ---------------------------------------------------------------------------

#[test]
fn close_floats_match() {
    assert!(outputs_match("3.1415926", "3.1415927"));
    assert!(outputs_match("1000000.0", "1000001.0"));
}

#[test]
fn distant_floats_do_not_match() {
    assert!(!outputs_match("3.14", "3.15"));
    assert!(!outputs_match("1.0", "2.0"));
}

#[test]
fn mixed_text_and_numeric_tokens() {
    assert!(outputs_match("answer 0.333333", "answer 0.3333333"));
    assert!(!outputs_match("answer 0.333333", "result 0.3333333"));
}

#[test]
fn float_formatting_differences_match() {
    assert!(outputs_match("1.5 2.25", "1.50 2.250"));
}

// ---------------------------------------------------------------------------
// Stage 4: per-line token sets
// ---------------------------------------------------------------------------

#[test]
fn reordered_tokens_on_a_line_match() {
    assert!(outputs_match("b a c", "a b c"));
}

#[test]
fn reordered_lines_do_not_match() {
    // Line order is significant; only within-line order is forgiven.
    assert!(!outputs_match("b\na", "a\nb"));
}

// ---------------------------------------------------------------------------
// Stage 5: rounded number sets
// ---------------------------------------------------------------------------

#[test]
fn rounded_number_sets_match() {
    assert!(outputs_match("2.0001 1.0002", "1.0 2.0"));
}

#[test]
fn rounded_sets_with_non_numbers_do_not_match() {
    assert!(!outputs_match("2.0001 x", "x 2.0"));
}
