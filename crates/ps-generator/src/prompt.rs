//! Prompt generation for the partial-parameterization model.
//!
//! The prompt shows the task's demonstration pairs and the full catalogue,
//! then asks the model for wrappers that fix arguments of exactly one
//! primitive. From the second iteration on it carries the engine's last
//! cost and expression.

use ps_core::{grid_json, Catalogue, Task};

use crate::response::{DEPTH_MARKER, PARTIAL_MARKER, SELECTED_MARKER};

/// Engine result carried into the next prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Feedback {
    pub cost: f64,
    pub expression: String,
}

impl Feedback {
    pub fn new(cost: f64, expression: impl Into<String>) -> Self {
        Self {
            cost,
            expression: expression.into(),
        }
    }
}

/// Renders the instruction document.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the prompt for one iteration.
    ///
    /// `feedback` is rendered only when it holds a non-zero cost.
    pub fn build_prompt(task: &Task, catalogue: &Catalogue, feedback: Option<&Feedback>) -> String {
        let mut prompt = String::new();

        prompt.push_str("You are given several input-output grid pairs from an ARC task:\n");
        prompt.push_str(&Self::format_examples(task));
        prompt.push_str("\nYou are given several C++ function declarations as primitives:\n");
        prompt.push_str(&Self::format_catalogue(catalogue));
        prompt.push('\n');
        prompt.push_str(INSTRUCTIONS);

        if let Some(feedback) = feedback.filter(|f| f.cost != 0.0) {
            prompt.push_str(&Self::format_feedback(feedback));
            prompt.push_str("\n\n");
        }

        prompt.push_str(&Self::expected_output());
        prompt
    }

    /// The corrective feedback sentence.
    pub fn format_feedback(feedback: &Feedback) -> String {
        format!(
            "The best found connection from the engine has a cost of {:?} and its expression is: {}.",
            feedback.cost, feedback.expression
        )
    }

    /// One `(<input>, <output>)` line per training pair.
    fn format_examples(task: &Task) -> String {
        task.train
            .iter()
            .map(|example| {
                format!(
                    "({}, {})\n",
                    grid_json(&example.input),
                    grid_json(&example.output)
                )
            })
            .collect()
    }

    /// Catalogue declarations with their descriptions, as annotated.
    fn format_catalogue(catalogue: &Catalogue) -> String {
        catalogue
            .entries()
            .iter()
            .map(|entry| format!("{}\n", entry.annotation))
            .collect()
    }

    fn expected_output() -> String {
        format!(
            r#"EXPECTED OUTPUT EXAMPLE WITHOUT ANY FORMATTING AND ANY EXPLANATIONS:
{SELECTED_MARKER}
int foo(int arg0, bool arg1);
std::map<int, int> bar(int arg0, double arg1);

{PARTIAL_MARKER}
int foo_i4(bool arg1) {{ return foo(4, arg1); }}
int foo_i6(bool arg1) {{ return foo(6, arg1); }}
std::map<int, int> bar_d1(int arg0) {{ return bar(arg0, 1.0); }}
std::map<int, int> bar_d2(int arg0) {{ return bar(arg0, 2.0); }}

{DEPTH_MARKER}
2"#
        )
    }
}

const INSTRUCTIONS: &str = r#"Your task is NOT to solve the ARC task directly.

You must help a symbolic program synthesis engine by generating
PARTIALLY PARAMETERIZED C++ FUNCTIONS based on the given primitives.

These functions must restrict the search space by fixing some parameters
(constants, sizes, colors, booleans, or structural choices),
while keeping other parameters free.

A partially parameterized function:
- calls exactly ONE existing primitive function
- fixes one or more arguments to constant values
- exposes the remaining arguments as parameters
- does not introduce new logic
- does not combine multiple primitives

Rules:
- Do NOT invent new primitive operations.
- Do NOT modify the body logic of primitives.
- Do NOT combine multiple primitives in a single function.
- Do NOT use loops, conditionals, or additional computations.
- Only generate function wrappers that call an existing function.

Output format:
- Output ONLY valid C++ function declarations and definitions.
- No explanations.
- No formatting.
- No comments.
- No markdown.
- No extra text.
- Each function must be standalone and compilable.
- Use types explicitly and no initializer lists.

Examples of full verbatim function declarations:
int foo(int i, bool b);
std::map<int, int> inferColorMapping(std::vector<std::pair<Eigen::MatrixXi, Eigen::MatrixXi>> arg0);

Example:

Primitives:
int foo(int arg0, bool arg1);
std::map<int, int> bar(int arg0, double arg1);

Valid partial parameterizations:
int foo_i4(bool arg1) { return foo(4, arg1); }
int foo_i6(bool arg1) { return foo(6, arg1); }
std::map<int, int> bar_d1(int arg0) { return bar(arg0, 1.0); }
std::map<int, int> bar_d2(int arg0) { return bar(arg0, 2.0); }

Invalid:
int bar(int x) { return foo(x, true) + 1; }
int baz(int x) { if (x > 0) return foo(x, true); }

Based on the observed input-output grid transformations,
identify constants or structural patterns that are likely invariant
across examples (such as fixed colors, fixed grid sizes,
specific region counts, or alignment directions).

Generate partial parameterizations that reflect these invariants.
Generate at most 5 partial parameterizations per primitive.
Prefer fewer, higher-confidence specializations.

If no reasonable partial parameterization can be inferred for a primitive,
do NOT generate any function for it.

The symbolic engine will evaluate all generated functions exhaustively.
Do not attempt to rank, score, or select solutions.

If a primitive already fully matches the observed transformation
without requiring any fixed parameter,
DO NOT generate any partial parameterization for it.

Only generate a partial parameterization if it is expected
to significantly reduce the search depth or branching factor
compared to using the primitive directly.

Do not generate partial parameterizations for primitives
that do not have free scalar or structural parameters.

Before outputting a function, ask yourself:
"Does this function restrict the domain of the primitive
more than calling the primitive directly?"
If the answer is no, do not output it.

First, select which of the given primitives are potentially useful
for explaining the observed input-output transformations.

Output the selected primitive declarations verbatim.

Then, for each selected primitive, generate partial parameterizations
ONLY IF fixing parameters is likely to further reduce the search space.

Finally, provide an integer number as the maximum depth level required
to combine the different primitives for the exploration engine.

It is valid to select a primitive without generating any partial parameterization for it.

Useful utility functions for type conversions:
std::vector<std::pair<Eigen::MatrixXi, Eigen::MatrixXi> > utility::matrixPairs(std::initializer_list<std::initializer_list<std::initializer_list<int> > > const& values);
std::vector<Eigen::MatrixXi> utility::matrices(std::initializer_list<std::initializer_list<std::initializer_list<int> > > const& values);

"#;
