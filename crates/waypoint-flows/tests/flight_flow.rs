use std::sync::Arc;

use serde_json::{json, Value};

use waypoint_agent::graph::{GraphError, GraphRunner};
use waypoint_agent::AgentError;
use waypoint_flows::flight::{
    run_flight_booking, select_seat, BookingOutcome, FlightDeps, FlightNode, SeatLetter,
    SeatPreference, SEAT_QUESTION,
};
use waypoint_flows::ScriptedPrompter;
use waypoint_test_utils::{last_user_text, test_app_config, Scripted, ScriptedLlm};

fn listed_flights() -> Value {
    json!([
        {"flight_number": "SFO-AK123", "price": 350, "origin": "SFO", "destination": "ANC", "date": "2025-01-10"},
        {"flight_number": "SFO-AK456", "price": 370, "origin": "SFO", "destination": "FAI", "date": "2025-01-10"},
        {"flight_number": "NYC-LA101", "price": 250, "origin": "SFO", "destination": "ANC", "date": "2025-01-10"}
    ])
}

fn found(number: &str, destination: &str) -> Scripted {
    Scripted::json(json!({
        "result": "found",
        "flight_number": number,
        "price": 250,
        "origin": "SFO",
        "destination": destination,
        "date": "2025-01-10"
    }))
}

#[tokio::test]
async fn test_books_cheapest_matching_flight() {
    let llm = ScriptedLlm::new(vec![
        Scripted::json(listed_flights()),
        Scripted::tool("get_flights", json!({})),
        // Wrong destination is sent back once by the validator
        found("SFO-AK456", "FAI"),
        found("NYC-LA101", "ANC"),
        Scripted::json(json!({"result": "seat", "row": 14, "seat": "A"})),
    ]);
    let calls = llm.call_counter();
    let requests = llm.requests();
    let prompter = Arc::new(ScriptedPrompter::new(["window seat in row 14"]).with_confirmations([true]));
    let runner = GraphRunner::<FlightNode>::new(FlightDeps::new(
        Arc::new(llm),
        &test_app_config(),
        prompter.clone(),
    ))
    .unwrap();

    let (outcome, history) = run_flight_booking(&runner).await.unwrap();

    assert_eq!(
        outcome,
        BookingOutcome::Purchased {
            flight_number: "NYC-LA101".into(),
            seat: SeatPreference {
                row: 14,
                seat: SeatLetter::A
            }
        }
    );
    assert_eq!(
        history.node_names(),
        vec!["ExtractFlights", "FindFlight", "ConfirmPurchase", "SelectSeat", "BuyTickets"]
    );
    assert_eq!(calls.get(), 5);
    // One budget covers every agent in the booking
    assert_eq!(runner.deps().usage.requests(), 5);
    assert!(prompter
        .shown()
        .contains(&"Purchasing flight NYC-LA101 with seat 14A...".to_string()));

    let requests = requests.lock().unwrap();
    assert_eq!(
        last_user_text(&requests[1]),
        "Find me a flight from SFO to ANC on 2025-01-10"
    );
    assert!(last_user_text(&requests[3]).starts_with("Flight does not meet user constraints."));
}

#[tokio::test]
async fn test_declined_purchase_ends_without_seat() {
    let llm = ScriptedLlm::new(vec![
        Scripted::json(listed_flights()),
        found("NYC-LA101", "ANC"),
    ]);
    let calls = llm.call_counter();
    let prompter = Arc::new(ScriptedPrompter::default().with_confirmations([false]));
    let runner = GraphRunner::<FlightNode>::new(FlightDeps::new(
        Arc::new(llm),
        &test_app_config(),
        prompter.clone(),
    ))
    .unwrap();

    let (outcome, _) = run_flight_booking(&runner).await.unwrap();
    assert_eq!(outcome, BookingOutcome::Declined);
    assert_eq!(calls.get(), 2);
    assert!(!prompter.asked().contains(&SEAT_QUESTION.to_string()));
}

#[tokio::test]
async fn test_empty_listing_ends_early() {
    let llm = ScriptedLlm::new(vec![Scripted::json(json!([]))]);
    let prompter = Arc::new(ScriptedPrompter::default());
    let runner = GraphRunner::<FlightNode>::new(FlightDeps::new(
        Arc::new(llm),
        &test_app_config(),
        prompter.clone(),
    ))
    .unwrap();

    let (outcome, history) = run_flight_booking(&runner).await.unwrap();
    assert_eq!(outcome, BookingOutcome::NoFlightsAvailable);
    assert_eq!(history.node_names(), vec!["ExtractFlights"]);
    assert_eq!(prompter.shown(), vec!["No flights available."]);
}

#[tokio::test]
async fn test_seat_falls_back_after_max_attempts() {
    let llm = ScriptedLlm::new(vec![
        Scripted::json(json!({"result": "failed"})),
        Scripted::json(json!({"result": "failed"})),
        Scripted::json(json!({"result": "failed"})),
    ]);
    let calls = llm.call_counter();
    let requests = llm.requests();
    let prompter = Arc::new(ScriptedPrompter::new(["the comfy one", "near a window", "you pick"]));
    let deps = FlightDeps::new(Arc::new(llm), &test_app_config(), prompter.clone());

    let selection = select_seat(&deps.seat_agent, prompter.as_ref(), &deps.usage, deps.limits, 3)
        .await
        .unwrap();

    assert!(selection.defaulted);
    assert_eq!(selection.attempts, 3);
    assert_eq!(selection.seat.to_string(), "10C");
    // Exactly one call per attempt, none after the fallback
    assert_eq!(calls.get(), 3);
    assert_eq!(prompter.asked().len(), 3);
    assert_eq!(
        prompter.shown().last().map(String::as_str),
        Some("Max retries reached. Assigning default seat 10C.")
    );

    // Each attempt continues the previous conversation
    let requests = requests.lock().unwrap();
    assert!(requests[1].len() > requests[0].len());
    assert!(requests[2].len() > requests[1].len());
}

#[tokio::test]
async fn test_seat_accepted_on_second_attempt() {
    let llm = ScriptedLlm::new(vec![
        Scripted::json(json!({"result": "failed"})),
        Scripted::json(json!({"result": "seat", "row": 1, "seat": "F"})),
    ]);
    let calls = llm.call_counter();
    let prompter = Arc::new(ScriptedPrompter::new(["hmm", "1F"]));
    let deps = FlightDeps::new(Arc::new(llm), &test_app_config(), prompter.clone());

    let selection = select_seat(&deps.seat_agent, prompter.as_ref(), &deps.usage, deps.limits, 3)
        .await
        .unwrap();
    assert!(!selection.defaulted);
    assert_eq!(selection.attempts, 2);
    assert_eq!(selection.seat.to_string(), "1F");
    assert_eq!(calls.get(), 2);
}

#[tokio::test]
async fn test_budget_aborts_before_next_request() {
    let llm = ScriptedLlm::responding(|messages| {
        if last_user_text(messages).contains("Flight SFO-AK123") {
            Scripted::json(listed_flights())
        } else {
            // The search agent never settles on an answer
            Scripted::tool("get_flights", json!({}))
        }
    });
    let calls = llm.call_counter();
    let mut config = test_app_config();
    config.limits.request_limit = Some(3);
    let runner = GraphRunner::<FlightNode>::new(FlightDeps::new(
        Arc::new(llm),
        &config,
        Arc::new(ScriptedPrompter::default()),
    ))
    .unwrap();

    let err = run_flight_booking(&runner).await.unwrap_err();

    assert!(err.is_limit_exceeded());
    match err {
        GraphError::Agent(AgentError::UsageLimitExceeded(msg)) => {
            assert_eq!(msg, "The next request would exceed the request_limit of 3");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(calls.get(), 3);
    assert_eq!(runner.deps().usage.requests(), 3);
}
