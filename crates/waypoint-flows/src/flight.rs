//! Flight booking pipeline.
//!
//! ExtractFlights → FindFlight → ConfirmPurchase → SelectSeat → BuyTickets,
//! with early exits when nothing is listed, nothing matches, or the user
//! declines. Every agent call in one booking draws on a single [`Usage`].

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use waypoint_agent::graph::{
    Edge, GraphContext, GraphError, GraphNode, GraphRunner, GraphSpec, RunHistory, Transition,
};
use waypoint_agent::{
    Agent, AgentError, ModelRetry, RunContext, RunOptions, Tool, ToolError, Usage, UsageLimits,
};
use waypoint_core::config::AppConfig;
use waypoint_core::traits::LlmClient;
use waypoint_core::types::ChatMessage;

use crate::prompt::UserPrompter;

/// Listings the pipeline books from. A real deployment would fetch these.
pub const FLIGHTS_WEB_PAGE: &str = "
1. Flight SFO-AK123
- Price: $350
- Origin: San Francisco International Airport (SFO)
- Destination: Ted Stevens Anchorage International Airport (ANC)
- Date: January 10, 2025

2. Flight SFO-AK456
- Price: $370
- Origin: San Francisco International Airport (SFO)
- Destination: Fairbanks International Airport (FAI)
- Date: January 10, 2025

3. Flight SFO-AK789
- Price: $400
- Origin: San Francisco International Airport (SFO)
- Destination: Juneau International Airport (JNU)
- Date: January 20, 2025

4. Flight NYC-LA101
- Price: $250
- Origin: San Francisco International Airport (SFO)
- Destination: Ted Stevens Anchorage International Airport (ANC)
- Date: January 10, 2025

5. Flight CHI-MIA202
- Price: $200
- Origin: Chicago O'Hare International Airport (ORD)
- Destination: Miami International Airport (MIA)
- Date: January 12, 2025

6. Flight BOS-SEA303
- Price: $120
- Origin: Boston Logan International Airport (BOS)
- Destination: Ted Stevens Anchorage International Airport (ANC)
- Date: January 12, 2025

7. Flight DFW-DEN404
- Price: $150
- Origin: Dallas/Fort Worth International Airport (DFW)
- Destination: Denver International Airport (DEN)
- Date: January 10, 2025

8. Flight ATL-HOU505
- Price: $180
- Origin: Hartsfield-Jackson Atlanta International Airport (ATL)
- Destination: George Bush Intercontinental Airport (IAH)
- Date: January 10, 2025
";

pub const SEAT_QUESTION: &str = "What seat would you like? (e.g., 12A)";

const SEAT_PROMPT: &str = "Extract the user's seat preference. \
Seats A and F are window seats. \
Row 1 is the front row. \
Row 1, 14, and 20 have extra leg room.";

/// Details of one flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlightDetails {
    pub flight_number: String,
    pub price: u32,
    /// Three-letter airport code
    pub origin: String,
    /// Three-letter airport code
    pub destination: String,
    pub date: NaiveDate,
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRequest {
    pub origin: String,
    pub destination: String,
    pub date: NaiveDate,
}

impl Default for FlightRequest {
    fn default() -> Self {
        Self {
            origin: "SFO".into(),
            destination: "ANC".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap_or_default(),
        }
    }
}

impl FlightRequest {
    pub fn matches(&self, flight: &FlightDetails) -> bool {
        flight.origin == self.origin
            && flight.destination == self.destination
            && flight.date == self.date
    }
}

/// The search agent's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SearchResult {
    /// The cheapest flight meeting the request.
    Found(FlightDetails),
    NoFlightFound,
}

/// Deps visible to the search agent and its tool.
#[derive(Debug, Clone)]
pub struct SearchDeps {
    pub request: FlightRequest,
    pub available_flights: Vec<FlightDetails>,
}

/// Hands the already-extracted flights to the search agent.
pub struct GetFlights;

impl Tool<SearchDeps> for GetFlights {
    fn name(&self) -> &str {
        "get_flights"
    }

    fn description(&self) -> &str {
        "Retrieve the flights already extracted from the listings."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    fn call<'a>(
        &'a self,
        ctx: RunContext<'a, SearchDeps>,
        _input: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>> {
        let flights = serde_json::to_value(&ctx.deps.available_flights)
            .map_err(|e| ToolError::Failed(e.to_string()));
        Box::pin(async move { flights })
    }
}

fn check_constraints(deps: &SearchDeps, result: &SearchResult) -> Result<(), ModelRetry> {
    match result {
        SearchResult::Found(flight) if !deps.request.matches(flight) => {
            Err(ModelRetry::new("Flight does not meet user constraints."))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SeatLetter {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl fmt::Display for SeatLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SeatPreference {
    /// Row number, 1 to 30.
    pub row: u8,
    pub seat: SeatLetter,
}

impl SeatPreference {
    pub const ROWS: std::ops::RangeInclusive<u8> = 1..=30;

    /// Assigned when the user never gives a usable answer.
    pub fn fallback() -> Self {
        Self {
            row: 10,
            seat: SeatLetter::C,
        }
    }
}

impl fmt::Display for SeatPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.seat)
    }
}

/// The seat agent's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SeatResult {
    Seat(SeatPreference),
    /// Unable to extract a seat selection.
    Failed,
}

fn check_row(_: &(), result: &SeatResult) -> Result<(), ModelRetry> {
    match result {
        SeatResult::Seat(seat) if !SeatPreference::ROWS.contains(&seat.row) => Err(
            ModelRetry::new(format!("Row {} does not exist; rows run from 1 to 30.", seat.row)),
        ),
        _ => Ok(()),
    }
}

/// The seat that was settled on and how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeatSelection {
    pub seat: SeatPreference,
    pub attempts: u32,
    /// True when every attempt failed and the fallback seat was assigned.
    pub defaulted: bool,
}

/// Ask for a seat up to `max_attempts` times, then fall back to 10C.
///
/// An answer the agent cannot read as a seat costs one attempt; the
/// conversation so far is carried into the next one. Budget errors end the
/// loop at once.
pub async fn select_seat(
    agent: &Agent<(), SeatResult>,
    prompter: &dyn UserPrompter,
    usage: &Usage,
    limits: UsageLimits,
    max_attempts: u32,
) -> Result<SeatSelection, GraphError> {
    let mut history: Vec<ChatMessage> = Vec::new();

    for attempt in 1..=max_attempts {
        let answer = prompter.ask(SEAT_QUESTION)?.ok_or_else(|| GraphError::MissingInput {
            node: "SelectSeat".into(),
            field: "seat".into(),
        })?;

        let options = RunOptions {
            history: &history,
            usage: Some(usage),
            limits,
        };
        match agent.run(&answer, &(), options).await {
            Ok(run) => match run.output {
                SeatResult::Seat(seat) => {
                    return Ok(SeatSelection {
                        seat,
                        attempts: attempt,
                        defaulted: false,
                    });
                }
                SeatResult::Failed => {
                    history = run.all_messages().to_vec();
                }
            },
            Err(AgentError::OutputRetriesExceeded { last_issue, .. }) => {
                warn!(attempt, issue = %last_issue, "Seat answer could not be parsed");
            }
            Err(e) => return Err(e.into()),
        }
        prompter.show("Invalid seat selection. Try again.");
    }

    prompter.show("Max retries reached. Assigning default seat 10C.");
    Ok(SeatSelection {
        seat: SeatPreference::fallback(),
        attempts: max_attempts,
        defaulted: true,
    })
}

/// How a booking run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BookingOutcome {
    Purchased {
        flight_number: String,
        seat: SeatPreference,
    },
    NoFlightsAvailable,
    NoFlightFound,
    Declined,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightState {
    pub available_flights: Vec<FlightDetails>,
    pub seat: Option<SeatSelection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum FlightNode {
    ExtractFlights { listing: String },
    FindFlight,
    ConfirmPurchase { flight: FlightDetails },
    SelectSeat { flight: FlightDetails },
    BuyTickets { flight: FlightDetails, seat: SeatPreference },
}

pub struct FlightDeps {
    pub extraction_agent: Agent<(), Vec<FlightDetails>>,
    pub search_agent: Agent<SearchDeps, SearchResult>,
    pub seat_agent: Agent<(), SeatResult>,
    pub request: FlightRequest,
    pub prompter: Arc<dyn UserPrompter>,
    /// Shared by every agent call in the booking.
    pub usage: Usage,
    pub limits: UsageLimits,
    pub seat_attempts: u32,
}

impl FlightDeps {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        config: &AppConfig,
        prompter: Arc<dyn UserPrompter>,
    ) -> Self {
        let model = config.model.clone();
        let retries = config.limits.output_retries;
        Self {
            extraction_agent: Agent::new(llm.clone(), model.clone())
                .system_prompt("Extract all the flight details from the given text.")
                .retries(retries),
            search_agent: Agent::new(llm.clone(), model.clone())
                .system_prompt("Find the cheapest flight for the user based on extracted flights.")
                .tool(GetFlights)
                .validate_with(check_constraints)
                .retries(retries.max(2)),
            seat_agent: Agent::new(llm, model)
                .system_prompt(SEAT_PROMPT)
                .validate_with(check_row)
                .retries(retries),
            request: FlightRequest::default(),
            prompter,
            usage: Usage::new(),
            limits: UsageLimits::from(&config.limits),
            seat_attempts: config.limits.seat_attempts,
        }
    }

    pub fn with_request(mut self, request: FlightRequest) -> Self {
        self.request = request;
        self
    }

    fn options(&self) -> RunOptions<'_> {
        RunOptions {
            history: &[],
            usage: Some(&self.usage),
            limits: self.limits,
        }
    }
}

impl GraphNode for FlightNode {
    type State = FlightState;
    type Deps = FlightDeps;
    type Output = BookingOutcome;

    fn name(&self) -> &'static str {
        match self {
            Self::ExtractFlights { .. } => "ExtractFlights",
            Self::FindFlight => "FindFlight",
            Self::ConfirmPurchase { .. } => "ConfirmPurchase",
            Self::SelectSeat { .. } => "SelectSeat",
            Self::BuyTickets { .. } => "BuyTickets",
        }
    }

    fn graph() -> GraphSpec {
        GraphSpec::new("flight_booking_graph", "ExtractFlights")
            .nodes([
                "ExtractFlights",
                "FindFlight",
                "ConfirmPurchase",
                "SelectSeat",
                "BuyTickets",
            ])
            .edge(Edge::next("ExtractFlights", "FindFlight"))
            .edge(Edge::end("ExtractFlights").label("no flights"))
            .edge(Edge::next("FindFlight", "ConfirmPurchase"))
            .edge(Edge::end("FindFlight").label("no flight found"))
            .edge(Edge::next("ConfirmPurchase", "SelectSeat"))
            .edge(Edge::end("ConfirmPurchase").label("declined"))
            .edge(Edge::next("SelectSeat", "BuyTickets"))
            .edge(Edge::end("BuyTickets").label("purchased"))
    }

    fn run<'a>(
        self,
        ctx: GraphContext<'a, FlightState, FlightDeps>,
    ) -> BoxFuture<'a, Result<Transition<Self, BookingOutcome>, GraphError>> {
        Box::pin(async move {
            let GraphContext { state, deps } = ctx;
            match self {
                Self::ExtractFlights { listing } => {
                    let run = deps.extraction_agent.run(&listing, &(), deps.options()).await?;
                    info!(flight_count = run.output.len(), "Found flights");
                    if run.output.is_empty() {
                        deps.prompter.show("No flights available.");
                        return Ok(Transition::End(BookingOutcome::NoFlightsAvailable));
                    }
                    state.available_flights = run.output;
                    Ok(Transition::Next(Self::FindFlight))
                }
                Self::FindFlight => {
                    let search = SearchDeps {
                        request: deps.request.clone(),
                        available_flights: state.available_flights.clone(),
                    };
                    let prompt = format!(
                        "Find me a flight from {} to {} on {}",
                        search.request.origin, search.request.destination, search.request.date
                    );
                    let run = deps.search_agent.run(&prompt, &search, deps.options()).await?;
                    match run.output {
                        SearchResult::Found(flight) => {
                            info!(flight = %flight.flight_number, price = flight.price, "Flight found");
                            Ok(Transition::Next(Self::ConfirmPurchase { flight }))
                        }
                        SearchResult::NoFlightFound => {
                            deps.prompter.show("No suitable flight found.");
                            Ok(Transition::End(BookingOutcome::NoFlightFound))
                        }
                    }
                }
                Self::ConfirmPurchase { flight } => {
                    deps.prompter.show(&format!(
                        "Flight found: {} from {} to {} on {} for ${}",
                        flight.flight_number, flight.origin, flight.destination, flight.date, flight.price
                    ));
                    if deps.prompter.confirm("Do you want to buy this flight?")? {
                        Ok(Transition::Next(Self::SelectSeat { flight }))
                    } else {
                        Ok(Transition::End(BookingOutcome::Declined))
                    }
                }
                Self::SelectSeat { flight } => {
                    let selection = select_seat(
                        &deps.seat_agent,
                        deps.prompter.as_ref(),
                        &deps.usage,
                        deps.limits,
                        deps.seat_attempts,
                    )
                    .await?;
                    state.seat = Some(selection);
                    Ok(Transition::Next(Self::BuyTickets {
                        flight,
                        seat: selection.seat,
                    }))
                }
                Self::BuyTickets { flight, seat } => {
                    info!(flight = %flight.flight_number, %seat, "Purchasing flight");
                    deps.prompter.show(&format!(
                        "Purchasing flight {} with seat {}...",
                        flight.flight_number, seat
                    ));
                    Ok(Transition::End(BookingOutcome::Purchased {
                        flight_number: flight.flight_number,
                        seat,
                    }))
                }
            }
        })
    }
}

/// Book from [`FLIGHTS_WEB_PAGE`] start to finish.
pub async fn run_flight_booking(
    runner: &GraphRunner<FlightNode>,
) -> Result<(BookingOutcome, RunHistory<FlightNode>), GraphError> {
    let mut state = FlightState::default();
    let start = FlightNode::ExtractFlights {
        listing: FLIGHTS_WEB_PAGE.to_string(),
    };
    let outcome = runner.run(start, &mut state).await;
    info!(
        requests = runner.deps().usage.requests(),
        total_tokens = runner.deps().usage.total_tokens(),
        "Booking finished"
    );
    outcome
}
