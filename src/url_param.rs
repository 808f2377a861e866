use std::fmt::Display;

use crate::error::HarvestError;

/// Rewrites the value of `name` inside an already-built URL.
///
/// The first textual occurrence of `name` is edited: its value starts right
/// after the separator following the name and ends at the next `&` (or the
/// end of the string). Everything else is left byte-for-byte intact, so
/// server-generated URLs keep their exact encoding.
pub fn set_param(url: &str, name: &str, value: impl Display) -> Result<String, HarvestError> {
    let index = url.find(name).ok_or_else(|| HarvestError::ParamNotFound {
        param: name.to_string(),
        url: url.to_string(),
    })?;
    let begin = value_start(url, index + name.len());
    let end = url[begin..]
        .find('&')
        .map(|offset| begin + offset)
        .unwrap_or(url.len());

    let value = value.to_string();
    let mut rewritten = String::with_capacity(url.len() - (end - begin) + value.len());
    rewritten.push_str(&url[..begin]);
    rewritten.push_str(&value);
    rewritten.push_str(&url[end..]);
    Ok(rewritten)
}

// Skips the single separator character after the name, if any.
fn value_start(url: &str, after_name: usize) -> usize {
    url[after_name..]
        .chars()
        .next()
        .map(|ch| after_name + ch.len_utf8())
        .unwrap_or(after_name)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi?db=snp&retstart=0&retmax=500&query_key=1&WebEnv=MCID_abc";

    #[test]
    fn rewrites_middle_parameter() {
        let url = set_param(URL, "retstart", 1500).unwrap();
        assert!(url.contains("&retstart=1500&retmax=500&"));
        assert_eq!(url.len(), URL.len() + 3);
    }

    #[test]
    fn rewrites_trailing_parameter() {
        let url = set_param(URL, "WebEnv", "MCID_xyz").unwrap();
        assert!(url.ends_with("&WebEnv=MCID_xyz"));
    }

    #[test]
    fn first_textual_match_wins() {
        let url = "https://host/x?start=1&retstart=2";
        assert_eq!(
            set_param(url, "start", 9).unwrap(),
            "https://host/x?start=9&retstart=2"
        );
        let url = "https://host/x?retstart=2&start=1";
        assert_eq!(
            set_param(url, "start", 9).unwrap(),
            "https://host/x?retstart=9&start=1"
        );
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = set_param(URL, "retmode", "text").unwrap_err();
        assert_matches!(err, HarvestError::ParamNotFound { ref param, .. } if param == "retmode");
    }

    #[test]
    fn round_trip_restores_original() {
        for (name, original) in [("retstart", "0"), ("retmax", "500"), ("query_key", "1")] {
            let edited = set_param(URL, name, "424242").unwrap();
            assert_ne!(edited, URL);
            assert_eq!(set_param(&edited, name, original).unwrap(), URL);
        }
    }

    #[test]
    fn name_at_end_without_value() {
        assert_eq!(set_param("a=1&flag", "flag", 2).unwrap(), "a=1&flag2");
    }
}
