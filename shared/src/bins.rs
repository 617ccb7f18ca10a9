use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::IntoEnumIterator;

use crate::BinColor;

/// Display metadata for one bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinDetails {
    pub bin_color: BinColor,
    pub label: String,
    pub icon: String,
    pub color_class: String,
    pub bg_color_class: String,
    pub description: String,
    pub accepted: Vec<String>,
    pub not_accepted: Vec<String>,
}

struct BinTable {
    label: &'static str,
    icon: &'static str,
    color_class: &'static str,
    bg_color_class: &'static str,
    description: &'static str,
    accepted: &'static [&'static str],
    not_accepted: &'static [&'static str],
}

const GREEN: BinTable = BinTable {
    label: "Organic",
    icon: "leaf",
    color_class: "text-bin-green",
    bg_color_class: "bg-bin-green/10",
    description: "For compostable, organic materials. These items are turned into nutrient-rich soil.",
    accepted: &[
        "Fruit & Vegetable Scraps",
        "Coffee Grounds & Filters",
        "Eggshells",
        "Yard Trimmings",
        "Grass Cuttings",
    ],
    not_accepted: &[
        "Plastic Bags",
        "Food-soiled Paper",
        "Pet Waste",
        "Diapers",
        "Liquids or Grease",
    ],
};

const BLUE: BinTable = BinTable {
    label: "Recycling",
    icon: "recycle",
    color_class: "text-bin-blue",
    bg_color_class: "bg-bin-blue/10",
    description: "For clean and dry recyclable materials. These items are processed and made into new products.",
    accepted: &[
        "Plastic Bottles & Jugs (#1, #2)",
        "Glass Jars & Bottles",
        "Aluminum & Tin Cans",
        "Paper & Cardboard",
    ],
    not_accepted: &[
        "Plastic Bags or Film",
        "Food Waste",
        "Styrofoam",
        "Electronics",
        "Ceramics",
    ],
};

const RED: BinTable = BinTable {
    label: "Landfill",
    icon: "trash-2",
    color_class: "text-bin-red",
    bg_color_class: "bg-bin-red/10",
    description: "For items that cannot be recycled or composted. This waste goes to the landfill.",
    accepted: &[
        "Plastic Bags & Film",
        "Styrofoam",
        "Snack Wrappers",
        "Broken Ceramics",
        "Diapers",
    ],
    not_accepted: &[
        "Recyclables",
        "Organics",
        "Hazardous Waste",
        "Electronics",
        "Batteries",
    ],
};

pub fn bin_details(bin_color: BinColor) -> BinDetails {
    let table = match bin_color {
        BinColor::Green => &GREEN,
        BinColor::Blue => &BLUE,
        BinColor::Red => &RED,
    };

    BinDetails {
        bin_color,
        label: table.label.to_string(),
        icon: table.icon.to_string(),
        color_class: table.color_class.to_string(),
        bg_color_class: table.bg_color_class.to_string(),
        description: table.description.to_string(),
        accepted: table.accepted.iter().map(|s| s.to_string()).collect(),
        not_accepted: table.not_accepted.iter().map(|s| s.to_string()).collect(),
    }
}

/// Unknown tokens fall back to the landfill entry.
pub fn bin_details_for_token(token: &str) -> BinDetails {
    bin_details(BinColor::from_str(token).unwrap_or(BinColor::Red))
}

/// Every bin, in declaration order.
pub fn all_bin_details() -> Vec<BinDetails> {
    BinColor::iter().map(bin_details).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_pure() {
        for color in BinColor::iter() {
            assert_eq!(bin_details(color), bin_details(color));
            assert_eq!(bin_details(color).bin_color, color);
        }
    }

    #[test]
    fn labels_match_bins() {
        assert_eq!(bin_details(BinColor::Blue).label, "Recycling");
        assert_eq!(bin_details(BinColor::Green).label, "Organic");
        assert_eq!(bin_details(BinColor::Red).label, "Landfill");
    }

    #[test]
    fn unknown_token_falls_back_to_landfill() {
        assert_eq!(bin_details_for_token("Yellow"), bin_details(BinColor::Red));
        assert_eq!(bin_details_for_token(""), bin_details(BinColor::Red));
        assert_eq!(bin_details_for_token("Green").label, "Organic");
    }
}
