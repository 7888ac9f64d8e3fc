//! Small helpers for reasoning about JVM type descriptors (`I`, `J`,
//! `Ljava/lang/String;`, `[I`, …) without needing a real class-file parser:
//! the core only ever needs to know a descriptor's width, its primitive
//! category, and how to split a method descriptor into parameter and return
//! descriptors.

/// `true` for `J` (long) and `D` (double): the two descriptors that occupy
/// two abstract stack slots / two local-variable slots.
pub fn is_wide(signature: &str) -> bool {
  matches!(signature, "J" | "D")
}

pub fn is_reference(signature: &str) -> bool {
  signature.starts_with('L') || signature.starts_with('[')
}

pub fn is_array(signature: &str) -> bool {
  signature.starts_with('[')
}

/// Descriptor of the element type of an array descriptor, if any.
pub fn array_element(signature: &str) -> Option<&str> {
  signature.strip_prefix('[')
}

/// Split a method descriptor `(args)ret` into its parameter descriptors and
/// return descriptor. Returns `None` if `descriptor` is not well-formed —
/// callers should treat that as just another source of "top".
pub fn parse_method_descriptor(descriptor: &str) -> Option<(Vec<&str>, &str)> {
  let body = descriptor.strip_prefix('(')?;
  let (params_str, ret) = body.split_once(')')?;

  let mut params = Vec::new();
  let mut rest = params_str;
  while !rest.is_empty() {
    let len = descriptor_len(rest)?;
    params.push(&rest[..len]);
    rest = &rest[len..];
  }

  Some((params, ret))
}

/// Length in bytes of a single field descriptor at the start of `s`.
fn descriptor_len(s: &str) -> Option<usize> {
  let bytes = s.as_bytes();
  let mut i = 0;
  while bytes.get(i) == Some(&b'[') {
    i += 1;
  }
  match bytes.get(i)? {
    b'L' => {
      let end = s[i..].find(';')?;
      Some(i + end + 1)
    }
    b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b'V' => Some(i + 1),
    _ => None,
  }
}

/// Number of abstract argument slots consumed by a parameter list, counting
/// wide parameters twice.
pub fn param_slot_count(params: &[&str]) -> usize {
  params.iter().map(|p| if is_wide(p) { 2 } else { 1 }).sum()
}

/// Slashed bytecode class name (`java/util/Random`) to the dotted form
/// [`crate::traits::ClassHierarchyOracle`] is documented to take
/// (`java.util.Random`).
pub fn to_dotted(class: &str) -> String {
  class.replace('/', ".")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splits_simple_descriptor() {
    let (params, ret) = parse_method_descriptor("(ILjava/lang/String;)Z").unwrap();
    assert_eq!(params, vec!["I", "Ljava/lang/String;"]);
    assert_eq!(ret, "Z");
  }

  #[test]
  fn splits_array_and_no_arg_descriptor() {
    let (params, ret) = parse_method_descriptor("()[I").unwrap();
    assert!(params.is_empty());
    assert_eq!(ret, "[I");
  }

  #[test]
  fn counts_wide_params_twice() {
    let (params, _) = parse_method_descriptor("(JID)V").unwrap();
    assert_eq!(param_slot_count(&params), 4);
  }

  #[test]
  fn rejects_malformed_descriptor() {
    assert!(parse_method_descriptor("I)V").is_none());
    assert!(parse_method_descriptor("(Lfoo)V").is_none());
  }
}
