//! Static catalog of supported retailers.

/// A retailer whose flyers are listed on the aggregator site.
#[derive(Debug, Clone, Copy)]
pub struct Retailer {
    /// Short identifier, also used as the shop name on stored flyers.
    pub id: &'static str,
    /// Listing page path relative to the site base URL.
    pub listing_path: &'static str,
    /// Acceptance predicate over the lowercased flyer title.
    accepts: fn(&str) -> bool,
}

impl Retailer {
    /// Whether a flyer with this title should be crawled.
    pub fn accepts(&self, title: &str) -> bool {
        (self.accepts)(&title.to_lowercase())
    }

    /// Absolute listing URL under `base_url`.
    pub fn listing_url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.listing_path)
    }
}

fn accept_all(_: &str) -> bool {
    true
}

fn albert_hypermarket(title: &str) -> bool {
    title.contains("hypermarket")
}

fn billa_full_flyer(title: &str) -> bool {
    !title.contains("malý leták")
}

fn tesco_hypermarket(title: &str) -> bool {
    title.contains("hypermarkety")
}

fn kaufland_groceries(title: &str) -> bool {
    !title.contains("spotřební zboží")
}

/// All known retailers.
pub static RETAILERS: &[Retailer] = &[
    Retailer {
        id: "albert",
        listing_path: "/letaky/albert/kraj-praha/praha/",
        accepts: albert_hypermarket,
    },
    Retailer {
        id: "billa",
        listing_path: "/letaky/billa/",
        accepts: billa_full_flyer,
    },
    Retailer {
        id: "tesco",
        listing_path: "/letaky/tesco/",
        accepts: tesco_hypermarket,
    },
    Retailer {
        id: "kaufland",
        listing_path: "/letaky/kaufland/kraj-praha/praha/kaufland-praha-5-stodulky-pod-hranici-1304-17/",
        accepts: kaufland_groceries,
    },
    Retailer {
        id: "globus",
        listing_path: "/letaky/globus/kraj-praha/praha/globus-hypermarket-a-baumarkt-praha-zlicin-sarska-5133-praha-5/",
        accepts: accept_all,
    },
    Retailer {
        id: "lidl",
        listing_path: "/letaky/lidl/",
        accepts: accept_all,
    },
];

/// Look up a retailer by id.
pub fn find_retailer(id: &str) -> Option<&'static Retailer> {
    RETAILERS.iter().find(|r| r.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        let albert = find_retailer("albert").unwrap();
        assert!(albert.accepts("Albert Hypermarket od 5.3."));
        assert!(!albert.accepts("Albert Supermarket"));

        let billa = find_retailer("billa").unwrap();
        assert!(!billa.accepts("BILLA Malý leták"));
        assert!(billa.accepts("BILLA leták"));

        let tesco = find_retailer("tesco").unwrap();
        assert!(tesco.accepts("Tesco Hypermarkety"));

        let kaufland = find_retailer("kaufland").unwrap();
        assert!(!kaufland.accepts("Kaufland Spotřební zboží"));

        assert!(find_retailer("lidl").unwrap().accepts("anything"));
        assert!(find_retailer("penny").is_none());
    }

    #[test]
    fn test_listing_url() {
        let lidl = find_retailer("lidl").unwrap();
        assert_eq!(
            lidl.listing_url("https://www.akcniceny.cz/"),
            "https://www.akcniceny.cz/letaky/lidl/"
        );
    }
}
