//! 内置目标：比赛观赛火车行程 + 开票、活动航班 + 开票

use super::types::{ArgKind, Goal, ToolCallSpec};

pub const GOAL_MATCH_TRAIN_INVOICE: &str = "goal_match_train_invoice";
pub const GOAL_EVENT_FLIGHT_INVOICE: &str = "goal_event_flight_invoice";

pub fn goal_match_train_invoice() -> Goal {
    Goal {
        id: GOAL_MATCH_TRAIN_INVOICE.to_string(),
        description: "Help the user book a trip to a city in the UK around the dates of a \
                      premier league match, then create an invoice for the trip."
            .to_string(),
        starter_prompt: "Welcome me, give me a description of what you can do, then ask me \
                         which team I want to see play."
            .to_string(),
        tools: vec![
            ToolCallSpec::new("search_fixtures")
                .arg("team", ArgKind::String)
                .arg("date_from", ArgKind::Date)
                .arg("date_to", ArgKind::Date),
            ToolCallSpec::new("search_trains")
                .arg("origin", ArgKind::String)
                .arg("destination", ArgKind::String)
                .arg("outbound_time", ArgKind::String)
                .arg("return_time", ArgKind::String),
            ToolCallSpec::new("book_trains")
                .arg("train_ids", ArgKind::String)
                .confirmed(),
            ToolCallSpec::new("create_invoice")
                .arg("amount", ArgKind::Number)
                .arg("trip_details", ArgKind::String)
                .confirmed(),
        ],
        match_keywords: [
            "match",
            "premier league",
            "football",
            "team",
            "fixture",
            "train",
            "trains",
            "rail",
        ]
        .iter()
        .map(|k| k.to_string())
        .collect(),
    }
}

pub fn goal_event_flight_invoice() -> Goal {
    Goal {
        id: GOAL_EVENT_FLIGHT_INVOICE.to_string(),
        description: "Help the user find an event in a city, search flights to attend it, \
                      then create an invoice for the trip."
            .to_string(),
        starter_prompt: "Welcome me, give me a description of what you can do, then ask me \
                         which city and month I want to travel in."
            .to_string(),
        tools: vec![
            ToolCallSpec::new("find_events")
                .arg("city", ArgKind::String)
                .arg("month", ArgKind::String),
            ToolCallSpec::new("search_flights")
                .arg("origin", ArgKind::String)
                .arg("destination", ArgKind::String)
                .arg("date_depart", ArgKind::Date)
                .arg("date_return", ArgKind::Date),
            ToolCallSpec::new("create_invoice")
                .arg("amount", ArgKind::Number)
                .arg("flight_details", ArgKind::String)
                .confirmed(),
        ],
        match_keywords: ["event", "events", "festival", "flight", "flights", "fly"]
            .iter()
            .map(|k| k.to_string())
            .collect(),
    }
}

pub fn builtin_goals() -> Vec<Goal> {
    vec![goal_match_train_invoice(), goal_event_flight_invoice()]
}
