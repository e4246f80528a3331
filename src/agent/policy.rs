//! Which network responses may be written into a generation at runtime.

use crate::http::{Response, ResponseType};

/// A response is cacheable when it is a complete success (exactly 200) and
/// came from the application's own origin.
pub fn is_cacheable(response: &Response) -> bool {
  response.status == 200 && response.response_type == ResponseType::Basic
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::response;

  const URL: &str = "https://attendance.example/app.js";

  #[test]
  fn test_same_origin_ok_is_cacheable() {
    assert!(is_cacheable(&response(URL, 200, "x", ResponseType::Basic)));
  }

  #[test]
  fn test_error_statuses_are_not_cacheable() {
    for status in [404, 500, 304] {
      assert!(!is_cacheable(&response(URL, status, "", ResponseType::Basic)));
    }
  }

  #[test]
  fn test_only_exact_200_counts() {
    assert!(!is_cacheable(&response(URL, 201, "", ResponseType::Basic)));
    assert!(!is_cacheable(&response(URL, 206, "x", ResponseType::Basic)));
  }

  #[test]
  fn test_cross_origin_is_not_cacheable() {
    let cdn = "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css";
    assert!(!is_cacheable(&response(cdn, 200, "x", ResponseType::Opaque)));
    assert!(!is_cacheable(&response(cdn, 200, "x", ResponseType::Cors)));
  }
}
