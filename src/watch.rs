//! The five watch kinds: what they send to the market API, when they run,
//! and how their responses become alert items.
//!
//! Watch files carry the request body fields under their upstream names so
//! users can paste exports from saddlebagexchange.com unchanged.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::discord::model::{COLOR_BLURPLE, COLOR_GREEN, COLOR_RED};
use crate::model::{
    display_value, AlertGroup, AlertItem, Cadence, DedupKey, FormattedEntry, Presentation,
    TimerSelector,
};

/// Kind-specific scan parameters, deserialized straight from a watch file
/// with `kind` as the tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchSpec {
    /// Region-wide undercut scan against the uploaded addon inventory.
    WowUndercut {
        region: String,
        #[serde(rename = "homeRealmID")]
        home_realm_id: i64,
        #[serde(rename = "addonData")]
        addon_data: Vec<Value>,
        #[serde(default)]
        include_sold_not_found: bool,
    },
    /// Price targets on a single realm's auction house.
    WowPricecheck {
        region: String,
        #[serde(rename = "homeRealmName")]
        home_realm_name: String,
        user_auctions: Vec<Value>,
    },
    /// Price targets across every realm of a region.
    WowRegionPricecheck {
        region: String,
        user_auctions: Vec<Value>,
    },
    /// Retainer undercut scan on one FFXIV server.
    FfxivUndercut {
        retainer_names: Vec<String>,
        server: String,
        ignore_ids: Vec<i64>,
        add_ids: Vec<i64>,
        hq_only: bool,
        #[serde(default)]
        mention: String,
    },
    /// Price targets on one FFXIV server.
    FfxivPricecheck {
        home_server: String,
        user_auctions: Vec<Value>,
        #[serde(default)]
        mention: String,
    },
}

impl WatchSpec {
    pub fn kind_name(&self) -> &'static str {
        match self {
            WatchSpec::WowUndercut { .. } => "wow_undercut",
            WatchSpec::WowPricecheck { .. } => "wow_pricecheck",
            WatchSpec::WowRegionPricecheck { .. } => "wow_region_pricecheck",
            WatchSpec::FfxivUndercut { .. } => "ffxiv_undercut",
            WatchSpec::FfxivPricecheck { .. } => "ffxiv_pricecheck",
        }
    }

    pub fn endpoint(&self) -> &'static str {
        match self {
            WatchSpec::WowUndercut { .. } => "api/wow/regionundercut",
            WatchSpec::WowPricecheck { .. } => "api/wow/pricecheck",
            WatchSpec::WowRegionPricecheck { .. } => "api/wow/regionpricecheck",
            WatchSpec::FfxivUndercut { .. } => "api/undercut",
            WatchSpec::FfxivPricecheck { .. } => "api/pricecheck",
        }
    }

    /// WoW scans chase the hourly auction-house upload; FFXIV data refreshes
    /// continuously, so those poll on a fixed five-minute cadence.
    pub fn cadence(&self) -> Cadence {
        match self {
            WatchSpec::WowUndercut { .. } => Cadence::UploadWindow {
                selector: TimerSelector::Simple,
                offset_low: 3,
                offset_high: 5,
            },
            WatchSpec::WowPricecheck { .. } | WatchSpec::WowRegionPricecheck { .. } => {
                Cadence::UploadWindow {
                    selector: TimerSelector::Simple,
                    offset_low: 3,
                    offset_high: 7,
                }
            }
            WatchSpec::FfxivUndercut { .. } | WatchSpec::FfxivPricecheck { .. } => {
                Cadence::FixedInterval { secs: 300 }
            }
        }
    }

    /// The (region, selector) pair whose upload timer gates this watch, if
    /// it runs on an upload window.
    pub fn timer_key(&self) -> Option<(String, TimerSelector)> {
        match (self.cadence(), self.region()) {
            (Cadence::UploadWindow { selector, .. }, Some(region)) => {
                Some((region.to_string(), selector))
            }
            _ => None,
        }
    }

    fn region(&self) -> Option<&str> {
        match self {
            WatchSpec::WowUndercut { region, .. }
            | WatchSpec::WowPricecheck { region, .. }
            | WatchSpec::WowRegionPricecheck { region, .. } => Some(region),
            _ => None,
        }
    }

    /// The realm/server the watch covers, for logs.
    pub fn label(&self) -> &str {
        match self {
            WatchSpec::WowUndercut { region, .. } => region,
            WatchSpec::WowPricecheck {
                home_realm_name, ..
            } => home_realm_name,
            WatchSpec::WowRegionPricecheck { region, .. } => region,
            WatchSpec::FfxivUndercut { server, .. } => server,
            WatchSpec::FfxivPricecheck { home_server, .. } => home_server,
        }
    }

    /// Discord tag posted alongside alerts, when configured.
    pub fn mention(&self) -> Option<&str> {
        match self {
            WatchSpec::FfxivUndercut { mention, .. }
            | WatchSpec::FfxivPricecheck { mention, .. } => {
                Some(mention.as_str()).filter(|m| !m.is_empty())
            }
            _ => None,
        }
    }

    /// Rejects watches that would scan nothing.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            WatchSpec::WowUndercut { addon_data, .. } if addon_data.is_empty() => {
                Err("addonData must not be empty")
            }
            WatchSpec::WowPricecheck { user_auctions, .. }
            | WatchSpec::WowRegionPricecheck { user_auctions, .. }
            | WatchSpec::FfxivPricecheck { user_auctions, .. }
                if user_auctions.is_empty() =>
            {
                Err("user_auctions must not be empty")
            }
            WatchSpec::FfxivUndercut { retainer_names, .. } if retainer_names.is_empty() => {
                Err("retainer_names must not be empty")
            }
            _ => Ok(()),
        }
    }

    /// The JSON body POSTed to the scan endpoint.
    pub fn build_request(&self) -> Value {
        match self {
            WatchSpec::WowUndercut {
                region,
                home_realm_id,
                addon_data,
                ..
            } => json!({
                "region": region,
                "homeRealmID": home_realm_id,
                "addonData": addon_data,
            }),
            WatchSpec::WowPricecheck {
                region,
                home_realm_name,
                user_auctions,
            } => json!({
                "region": region,
                "homeRealmName": home_realm_name,
                "user_auctions": user_auctions,
            }),
            WatchSpec::WowRegionPricecheck {
                region,
                user_auctions,
            } => json!({
                "region": region,
                "user_auctions": user_auctions,
            }),
            WatchSpec::FfxivUndercut {
                retainer_names,
                server,
                ignore_ids,
                add_ids,
                hq_only,
                ..
            } => json!({
                "retainer_names": retainer_names,
                "server": server,
                "ignore_ids": ignore_ids,
                "add_ids": add_ids,
                "hq_only": hq_only,
            }),
            WatchSpec::FfxivPricecheck {
                home_server,
                user_auctions,
                ..
            } => json!({
                "home_server": home_server,
                "user_auctions": user_auctions,
            }),
        }
    }

    /// Turn a raw scan response into alert groups. Empty responses (null,
    /// false, `{}`, `[]`) mean the scan found nothing and yield no groups.
    pub fn parse_response(&self, raw: &Value) -> Vec<AlertGroup> {
        if is_empty_response(raw) {
            return Vec::new();
        }
        match self {
            WatchSpec::WowUndercut {
                region,
                include_sold_not_found,
                ..
            } => parse_wow_undercut(region, *include_sold_not_found, raw),
            WatchSpec::WowPricecheck {
                home_realm_name, ..
            } => parse_wow_pricecheck(home_realm_name, raw),
            WatchSpec::WowRegionPricecheck { .. } => parse_wow_region_pricecheck(raw),
            WatchSpec::FfxivUndercut { server, .. } => parse_ffxiv_undercut(server, raw),
            WatchSpec::FfxivPricecheck { .. } => parse_ffxiv_pricecheck(raw),
        }
    }
}

/// Anything the API returns to signal "no matches": null, false, empty
/// object/array/string.
pub fn is_empty_response(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Number(_) => false,
    }
}

fn text(value: &Value, key: &str) -> String {
    value.get(key).map(display_value).unwrap_or_default()
}

fn attr(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn parse_wow_undercut(region: &str, include_sold_not_found: bool, raw: &Value) -> Vec<AlertGroup> {
    let Some(by_realm) = raw.get("results_by_realm").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut groups = Vec::new();
    for (realm, datasets) in by_realm {
        let undercuts = collect_undercut_items(realm, datasets.get("undercuts"), "undercuts");
        if !undercuts.is_empty() {
            groups.push(AlertGroup {
                presentation: Presentation::Embed {
                    title: "Undercuts".into(),
                    description: format!(
                        "List of your items that are undercut!\nRealm: {realm}\nRegion: {region}\n"
                    ),
                    color: COLOR_RED,
                },
                items: undercuts,
            });
        }
        if include_sold_not_found {
            let not_found = collect_undercut_items(realm, datasets.get("not_found"), "not_found");
            if !not_found.is_empty() {
                groups.push(AlertGroup {
                    presentation: Presentation::Embed {
                        title: "Sold, Expired or Not Found".into(),
                        description: format!(
                            "List of items with price levels not found in the blizzard api data.\nRealm: {realm}\nRegion: {region}\n"
                        ),
                        color: COLOR_GREEN,
                    },
                    items: not_found,
                });
            }
        }
    }
    groups
}

fn collect_undercut_items(realm: &str, list: Option<&Value>, dataset: &str) -> Vec<AlertItem> {
    let Some(list) = list.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for value in list {
        let item_id = attr(value, "item_id");
        let entry = FormattedEntry::field(
            format!("**{}**", text(value, "item_name")),
            format!(
                "[Link]({})\nItem ID: ({})\nLowest Price: {}\nYour Price: {}",
                text(value, "link"),
                display_value(&item_id),
                text(value, "lowest_price"),
                text(value, "user_price"),
            ),
        );
        items.push(AlertItem {
            key: DedupKey::item_on_realm(&item_id, realm),
            attrs: json!({
                "lowest_price": attr(value, "lowest_price"),
                "user_price": attr(value, "user_price"),
                "dataset": dataset,
            }),
            entry,
        });
    }
    items
}

/// One snipe result rendered as a fenced content block.
fn snipe_block(auction: &Value, link_label: &str, realm_names: &str) -> String {
    format!(
        "==================================\n\
         `item:` {}\n\
         `price:` {}\n\
         `desired_state:` {}\n\
         `itemID:` {}\n\
         [{}]({})\n\
         realmNames: {}\n\
         ==================================",
        text(auction, "item_name"),
        text(auction, "ah_price"),
        text(auction, "desired_state"),
        text(auction, "item_id"),
        link_label,
        text(auction, "link"),
        realm_names,
    )
}

fn parse_wow_pricecheck(home_realm_name: &str, raw: &Value) -> Vec<AlertGroup> {
    let Some(matching) = raw.get("matching").and_then(Value::as_array) else {
        return Vec::new();
    };
    let items: Vec<AlertItem> = matching
        .iter()
        .map(|auction| AlertItem {
            key: DedupKey::item_on_realm(&attr(auction, "item_id"), home_realm_name),
            attrs: auction.clone(),
            entry: FormattedEntry::plain(snipe_block(auction, "link", home_realm_name)),
        })
        .collect();
    content_group(items)
}

fn parse_wow_region_pricecheck(raw: &Value) -> Vec<AlertGroup> {
    let Some(matching) = raw.get("matching").and_then(Value::as_array) else {
        return Vec::new();
    };
    let items: Vec<AlertItem> = matching
        .iter()
        .map(|auction| {
            let realm_names = text(auction, "realm_names");
            AlertItem {
                // The realm set is part of the identity: the same item
                // resurfacing on other realms is a new alert.
                key: DedupKey::item_on_realm(&attr(auction, "item_id"), &realm_names),
                attrs: auction.clone(),
                entry: FormattedEntry::plain(snipe_block(auction, "Undermine link", &realm_names)),
            }
        })
        .collect();
    content_group(items)
}

fn content_group(items: Vec<AlertItem>) -> Vec<AlertGroup> {
    if items.is_empty() {
        return Vec::new();
    }
    vec![AlertGroup {
        presentation: Presentation::Content,
        items,
    }]
}

fn parse_ffxiv_undercut(config_server: &str, raw: &Value) -> Vec<AlertGroup> {
    let server = raw
        .get("server")
        .and_then(Value::as_str)
        .unwrap_or(config_server);
    let Some(auction_data) = raw.get("auction_data").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for details in auction_data.values() {
        let real_name = text(details, "real_name");
        let line = format!(
            "[{}]({}) — Mine: {}, {}: {}",
            real_name,
            text(details, "link"),
            text(details, "my_ppu"),
            text(details, "undercut_retainer"),
            text(details, "ppu"),
        );
        items.push(AlertItem {
            key: DedupKey::listing(&real_name, server),
            attrs: json!({
                "my_ppu": attr(details, "my_ppu"),
                "ppu": attr(details, "ppu"),
                "undercut_retainer": attr(details, "undercut_retainer"),
            }),
            entry: FormattedEntry::plain(line).in_section(text(details, "my_retainer")),
        });
    }
    if items.is_empty() {
        return Vec::new();
    }
    vec![AlertGroup {
        presentation: Presentation::Embed {
            title: format!("Undercuts - {server}"),
            description: "List of items that are being undercut!".into(),
            color: COLOR_GREEN,
        },
        items,
    }]
}

fn parse_ffxiv_pricecheck(raw: &Value) -> Vec<AlertGroup> {
    let Some(matching) = raw.get("matching").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for m in matching {
        // The API pads results with "itemName": false placeholders.
        if is_empty_response(&attr(m, "itemName")) {
            continue;
        }
        let item_id = attr(m, "itemID");
        let desc = format!(
            "[Universalis Link](https://universalis.app/market/{})\n\
             Server: {}\n\
             DC: {}\n\
             Lowest Price: {}\n\
             Quantity: {}\n\
             HQ: {}",
            display_value(&item_id),
            text(m, "server"),
            text(m, "dc"),
            format_thousands(m.get("minPrice")),
            text(m, "minListingQuantity"),
            text(m, "hq"),
        );
        items.push(AlertItem {
            key: DedupKey::new(display_value(&item_id)),
            attrs: json!({
                "server": attr(m, "server"),
                "minPrice": attr(m, "minPrice"),
                "minListingQuantity": attr(m, "minListingQuantity"),
                "match_desire": attr(m, "match_desire"),
            }),
            entry: FormattedEntry::field(format!("**{}**", text(m, "itemName")), desc),
        });
    }
    if items.is_empty() {
        return Vec::new();
    }
    vec![AlertGroup {
        presentation: Presentation::Embed {
            title: "Price Alert".into(),
            description: "List of items that match your price alert settings".into(),
            color: COLOR_BLURPLE,
        },
        items,
    }]
}

/// Render a price with thousands separators. Non-integer values fall back
/// to their plain form.
fn format_thousands(v: Option<&Value>) -> String {
    match v {
        Some(v) => match v.as_i64() {
            Some(n) => group_digits(n),
            None => display_value(v),
        },
        None => String::new(),
    }
}

fn group_digits(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{out}")
    } else {
        out
    }
}
