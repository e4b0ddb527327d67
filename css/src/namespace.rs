use vitrine_descriptor::{Fqn, InstanceId};

/// `widget-<fqn>-<hash>`, where `<fqn>` has every non-alphanumeric character replaced
/// by `-` and `<hash>` is the base-36 absolute value of [`string_hash`] of
/// `"<fqn>-<instance id>"`.
pub fn create_namespace(fqn: &Fqn, instance_id: &InstanceId) -> String {
    let hash = string_hash(&format!("{fqn}-{instance_id}"));
    let class: String = fqn
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("widget-{class}-{}", to_base36(i64::from(hash).unsigned_abs()))
}

/// 32-bit `h = 31 * h + unit` over the UTF-16 code units of `value`, wrapping.
pub fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}
