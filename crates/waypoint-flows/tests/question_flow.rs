use std::sync::Arc;

use serde_json::json;

use waypoint_agent::graph::{GraphError, GraphRunner, JsonlHistoryStore};
use waypoint_flows::question::{
    run_continuous, run_interactive, ContinuousOutcome, QuestionDeps, QuestionNode,
};
use waypoint_flows::ScriptedPrompter;
use waypoint_test_utils::{last_user_text, test_app_config, temp_dir, Scripted, ScriptedLlm};

fn runner(llm: ScriptedLlm) -> GraphRunner<QuestionNode> {
    let config = test_app_config();
    GraphRunner::new(QuestionDeps::new(Arc::new(llm), &config)).unwrap()
}

#[tokio::test]
async fn test_terminates_once_an_answer_is_correct() {
    let llm = ScriptedLlm::new(vec![
        Scripted::text("What is 2 + 2?"),
        Scripted::json(json!({"correct": false, "comment": "Not quite."})),
        Scripted::text("What is the capital of France?"),
        Scripted::json(json!({"correct": true, "comment": "Well done!"})),
    ]);
    let requests = llm.requests();
    let runner = runner(llm);
    let prompter = ScriptedPrompter::new(["5", "Paris"]);

    let (comment, history) = run_interactive(&runner, &prompter).await.unwrap();

    assert_eq!(comment, "Well done!");
    assert_eq!(
        history.node_names(),
        vec![
            "Ask",
            "Answer",
            "Evaluate",
            "Reprimand",
            "Ask",
            "Answer",
            "Evaluate",
            "Congratulate"
        ]
    );
    assert_eq!(
        prompter.asked(),
        vec!["What is 2 + 2?", "What is the capital of France?"]
    );
    assert_eq!(
        prompter.shown(),
        vec!["Comment: Not quite.", "Correct answer! Well done!"]
    );

    // The evaluator sees the question and answer as XML
    let requests = requests.lock().unwrap();
    let eval_prompt = last_user_text(&requests[1]);
    assert!(eval_prompt.contains("<question>What is 2 + 2?</question>"));
    assert!(eval_prompt.contains("<answer>5</answer>"));

    // The second question carries the ask agent's earlier conversation
    assert!(requests[2].len() > requests[0].len());
}

#[tokio::test]
async fn test_always_incorrect_hits_step_cap() {
    let llm = ScriptedLlm::responding(|messages| {
        if last_user_text(messages).contains("<answer>") {
            Scripted::json(json!({"correct": false, "comment": "Wrong."}))
        } else {
            Scripted::text("What is 2 + 2?")
        }
    });
    let runner = runner(llm).with_max_steps(Some(12));
    let prompter = ScriptedPrompter::new(vec!["5"; 20]);

    let err = run_interactive(&runner, &prompter).await.unwrap_err();

    assert!(err.is_limit_exceeded());
    assert!(matches!(err, GraphError::StepLimitExceeded { limit: 12, .. }));
    // Four steps per lap: three full laps before the cap
    assert_eq!(prompter.asked().len(), 3);
}

#[tokio::test]
async fn test_interactive_without_answer_is_missing_input() {
    let runner = runner(ScriptedLlm::new(vec![Scripted::text("What is 2 + 2?")]));
    let prompter = ScriptedPrompter::default();

    let err = run_interactive(&runner, &prompter).await.unwrap_err();
    assert!(matches!(err, GraphError::MissingInput { .. }));
}

#[tokio::test]
async fn test_continuous_pauses_and_resumes_from_file() {
    let dir = temp_dir();
    let path = dir.path().join("question_graph.jsonl");
    let config = test_app_config();

    // First invocation: a question is asked and nobody answers yet
    let first = GraphRunner::<QuestionNode>::new(QuestionDeps::new(
        Arc::new(ScriptedLlm::new(vec![Scripted::text("What is 2 + 2?")])),
        &config,
    ))
    .unwrap()
    .with_store(JsonlHistoryStore::new(&path));
    let outcome = run_continuous(&first, &ScriptedPrompter::default()).await.unwrap();
    assert_eq!(
        outcome,
        ContinuousOutcome::AwaitingAnswer {
            question: "What is 2 + 2?".into()
        }
    );
    drop(first);

    // Second invocation: only the file carries the pending question
    let llm = ScriptedLlm::new(vec![Scripted::json(
        json!({"correct": true, "comment": "Correct."}),
    )]);
    let calls = llm.call_counter();
    let second = GraphRunner::<QuestionNode>::new(QuestionDeps::new(Arc::new(llm), &config))
        .unwrap()
        .with_store(JsonlHistoryStore::new(&path));
    let outcome = run_continuous(&second, &ScriptedPrompter::new(["4"])).await.unwrap();
    match outcome {
        ContinuousOutcome::Finished { comment, history } => {
            assert_eq!(comment, "Correct.");
            assert_eq!(
                history.node_names(),
                vec!["Ask", "Answer", "Evaluate", "Congratulate"]
            );
        }
        other => panic!("expected a finished run, got {:?}", other),
    }
    // No new question was asked on resume
    assert_eq!(calls.get(), 1);

    // Third invocation: the finished run is cleared and a new one starts
    let third = GraphRunner::<QuestionNode>::new(QuestionDeps::new(
        Arc::new(ScriptedLlm::new(vec![Scripted::text("Name a prime.")])),
        &config,
    ))
    .unwrap()
    .with_store(JsonlHistoryStore::new(&path));
    let outcome = run_continuous(&third, &ScriptedPrompter::default()).await.unwrap();
    assert_eq!(
        outcome,
        ContinuousOutcome::AwaitingAnswer {
            question: "Name a prime.".into()
        }
    );
    let lines = std::fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(lines, 1);
}
