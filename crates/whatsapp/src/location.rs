//! Coordinate extraction from free text and location formatting.

use std::sync::LazyLock;

use regex::Regex;

/// Two decimal numbers separated by a comma and optional whitespace, not
/// glued to a preceding digit or dot.
#[allow(clippy::expect_used)]
static COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.])([-+]?\d+(?:\.\d+)?),\s*([-+]?\d+(?:\.\d+)?)")
        .expect("coordinate pattern is valid")
});

/// First valid `lat,lon` pair in `text`, normalised to `"<lat>,<lon>"`.
///
/// Latitude must lie in `[-90, 90]` and longitude in `[-180, 180]`; pairs out
/// of range are skipped in favour of later ones.
pub fn find_coordinates(text: &str) -> Option<String> {
    COORDINATES.captures_iter(text).find_map(|caps| {
        let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
        let lon: f64 = caps.get(2)?.as_str().parse().ok()?;
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon))
            .then(|| format!("{lat},{lon}"))
    })
}

/// Native location pins are stored with five decimals.
pub fn format_location(latitude: f64, longitude: f64) -> String {
    format!("{latitude:.5},{longitude:.5}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_embedded_pair() {
        assert_eq!(
            find_coordinates("Lunch at -23.55,-46.63").as_deref(),
            Some("-23.55,-46.63")
        );
        assert_eq!(
            find_coordinates("meet here: 40.4168, -3.7038 ok").as_deref(),
            Some("40.4168,-3.7038")
        );
        assert_eq!(find_coordinates("10,20").as_deref(), Some("10,20"));
    }

    #[test]
    fn rejects_out_of_range_pairs() {
        assert_eq!(find_coordinates("95,200"), None);
        assert_eq!(find_coordinates("45,181"), None);
        assert_eq!(find_coordinates("-91.0,0"), None);
    }

    #[test]
    fn skips_invalid_pair_for_a_later_valid_one() {
        assert_eq!(
            find_coordinates("95,200 then 1.5,2.5").as_deref(),
            Some("1.5,2.5")
        );
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(find_coordinates("90,180").as_deref(), Some("90,180"));
        assert_eq!(find_coordinates("-90,-180").as_deref(), Some("-90,-180"));
    }

    #[test]
    fn plain_text_has_no_coordinates() {
        assert_eq!(find_coordinates("hello world"), None);
        assert_eq!(find_coordinates("one, two"), None);
        assert_eq!(find_coordinates(""), None);
    }

    #[test]
    fn explicit_plus_sign_is_accepted() {
        assert_eq!(find_coordinates("+12.5,+7").as_deref(), Some("12.5,7"));
    }

    #[test]
    fn location_uses_five_decimals() {
        assert_eq!(format_location(-23.5505, -46.633308), "-23.55050,-46.63331");
        assert_eq!(format_location(0.0, 0.0), "0.00000,0.00000");
    }
}
