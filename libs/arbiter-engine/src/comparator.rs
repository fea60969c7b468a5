/// Output Comparator
///
/// **Core Responsibility:**
/// Decide whether a program's stdout matches a test case's expected output.
///
/// **Rules (first match wins):**
/// 1. Trimmed strings are byte-equal → pass
/// 2. Both parse as list literals of equal length with pairwise-equal
///    elements → pass. Single quotes are rewritten to double quotes first,
///    so `['a', 'b']` and `["a","b"]` are the same answer.
/// 3. Otherwise → fail
///
/// **Properties:**
/// - Pure, never errors. A parse failure in step 2 is simply "no match".
/// - Numbers compare by value (`1` equals `1.0`), nested lists recursively.
/// - Internal whitespace and case matter in step 1.
use serde_json::Value;

pub fn compare(actual: &str, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();

    if actual == expected {
        return true;
    }

    match (parse_list(actual), parse_list(expected)) {
        (Some(a), Some(b)) => lists_equal(&a, &b),
        _ => false,
    }
}

fn parse_list(text: &str) -> Option<Vec<Value>> {
    // Cheap reject before handing arbitrary output to the parser
    if !text.starts_with('[') {
        return None;
    }
    match serde_json::from_str::<Value>(&text.replace('\'', "\"")) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn lists_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| elements_equal(x, y))
}

fn elements_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => lists_equal(x, y),
        _ => a == b,
    }
}
