//! Module generation.
//!
//! Renders the C++ header that exposes every catalogue primitive through a
//! uniform `std::any` call shape, re-exports the selected primitives, and
//! splices their registrations between the engine prologue and epilogue.
//!
//! Rendering is a pure function of its inputs; writing is a separate step.
//!
//! Proposed specializations are validated and returned as
//! [`DeferredProposal`]s but never emitted into the header. The `partials`
//! namespace only pulls in `specifics`.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use ps_core::{Catalogue, Signature, TypeTag};
use regex::Regex;

use crate::response::{ModelResponse, ProposedSpecialization};

const INDENT: &str = "        ";

/// File locations inside the engine source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    /// Generated header
    pub header: PathBuf,
    /// Engine source fragment preceding the registration block
    pub prologue: PathBuf,
    /// Engine source fragment following the registration block
    pub epilogue: PathBuf,
    /// Generated engine source
    pub engine_source: PathBuf,
    /// Annotated primitive header the catalogue is read from
    pub primitives: PathBuf,
}

impl Default for ModuleLayout {
    fn default() -> Self {
        Self::rooted("..")
    }
}

impl ModuleLayout {
    /// Standard layout under a source root.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            header: root.join("include/aicpp/partials.h"),
            prologue: root.join("src/engine.cpp.in1"),
            epilogue: root.join("src/engine.cpp.in2"),
            engine_source: root.join("src/engine.cpp"),
            primitives: root.join("include/aicpp/primitives.h"),
        }
    }
}

/// Fixed text of the generated header.
#[derive(Debug, Clone)]
pub struct ModuleTemplate {
    /// Enclosing namespace
    pub namespace: String,
    /// Include guard macro
    pub include_guard: String,
    /// Standard headers
    pub system_includes: Vec<String>,
    /// Project headers
    pub local_includes: Vec<String>,
}

impl Default for ModuleTemplate {
    fn default() -> Self {
        Self {
            namespace: "aicpp".to_string(),
            include_guard: "AICPP_PARTIALS_H".to_string(),
            system_includes: vec!["any".into(), "map".into(), "vector".into()],
            local_includes: vec!["aicpp/primitives.h".into(), "aicpp/utility.h".into()],
        }
    }
}

/// Engine source fragments around the registration block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineTemplate {
    pub prologue: String,
    pub epilogue: String,
}

impl EngineTemplate {
    pub fn new(prologue: impl Into<String>, epilogue: impl Into<String>) -> Self {
        Self {
            prologue: prologue.into(),
            epilogue: epilogue.into(),
        }
    }

    /// Read both fragments.
    ///
    /// On failure, returns the path that could not be read.
    pub async fn load(layout: &ModuleLayout) -> Result<Self, (PathBuf, io::Error)> {
        let prologue = tokio::fs::read_to_string(&layout.prologue)
            .await
            .map_err(|e| (layout.prologue.clone(), e))?;
        let epilogue = tokio::fs::read_to_string(&layout.epilogue)
            .await
            .map_err(|e| (layout.epilogue.clone(), e))?;
        Ok(Self { prologue, epilogue })
    }
}

/// Engine registration of one selected primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub inputs: Vec<TypeTag>,
    pub output: TypeTag,
}

impl Registration {
    pub fn from_signature(signature: &Signature) -> Self {
        Self {
            name: signature.name.clone(),
            inputs: signature.input_tags(),
            output: signature.output_tag(),
        }
    }

    /// The two engine source lines declaring and registering the neuron.
    pub fn render(&self) -> String {
        let inputs: Vec<String> = self.inputs.iter().map(TypeTag::render).collect();
        format!(
            "    Neuron {name}_neuron{{\"{name}\", fulls::{name}, {{{inputs}}}, {output}}};\n    neurons.emplace_back({name}_neuron);\n",
            name = self.name,
            inputs = inputs.join(", "),
            output = self.output.render(),
        )
    }
}

/// A shape problem found in a proposed specialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalIssue {
    /// Name does not follow `<baseName>_<suffix>`
    MissingSuffix,
    /// Base name is not a catalogue primitive
    UnknownBase(String),
    /// Body calls this many catalogue primitives instead of one
    PrimitiveCalls(usize),
    /// Body calls a primitive other than its base
    BaseNotCalled { base: String, called: String },
}

impl std::fmt::Display for ProposalIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalIssue::MissingSuffix => write!(f, "name lacks a <base>_<suffix> form"),
            ProposalIssue::UnknownBase(base) => write!(f, "unknown base primitive {}", base),
            ProposalIssue::PrimitiveCalls(n) => write!(f, "body calls {} primitives", n),
            ProposalIssue::BaseNotCalled { base, called } => {
                write!(f, "body calls {} instead of {}", called, base)
            }
        }
    }
}

/// A proposal that was checked but not emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredProposal {
    pub proposal: ProposedSpecialization,
    /// Empty when the proposal is well-formed
    pub issues: Vec<ProposalIssue>,
}

impl DeferredProposal {
    pub fn is_well_formed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Output of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedModule {
    /// Header text
    pub header: String,
    /// Prologue, registration block, epilogue
    pub engine_source: String,
    /// Registrations, in selection order
    pub registrations: Vec<Registration>,
    /// Validated proposals, in response order
    pub deferred: Vec<DeferredProposal>,
}

impl GeneratedModule {
    /// Overwrite the header and engine source.
    pub async fn write(&self, layout: &ModuleLayout) -> io::Result<()> {
        write_file(&layout.header, &self.header).await?;
        write_file(&layout.engine_source, &self.engine_source).await
    }
}

async fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await
}

/// Renders generated modules.
#[derive(Debug, Clone, Default)]
pub struct ModuleGenerator {
    template: ModuleTemplate,
}

impl ModuleGenerator {
    pub fn new(template: ModuleTemplate) -> Self {
        Self { template }
    }

    /// Render the header and engine source for one response.
    pub fn render(
        &self,
        catalogue: &Catalogue,
        response: &ModelResponse,
        engine: &EngineTemplate,
    ) -> GeneratedModule {
        let selected = unique_by_name(&response.selected);
        let registrations: Vec<Registration> =
            selected.iter().map(|s| Registration::from_signature(s)).collect();

        let deferred: Vec<DeferredProposal> = response
            .proposals
            .iter()
            .map(|p| {
                let issues = validate_proposal(p, catalogue);
                if issues.is_empty() {
                    tracing::debug!(name = %p.signature.name, "proposal deferred");
                } else {
                    let issues: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
                    tracing::debug!(name = %p.signature.name, issues = %issues.join("; "), "proposal rejected");
                }
                DeferredProposal {
                    proposal: p.clone(),
                    issues,
                }
            })
            .collect();

        let header = self.render_header(catalogue, &selected);

        let mut engine_source = engine.prologue.clone();
        for registration in &registrations {
            engine_source.push_str(&registration.render());
        }
        engine_source.push_str(&engine.epilogue);

        GeneratedModule {
            header,
            engine_source,
            registrations,
            deferred,
        }
    }

    fn render_header(&self, catalogue: &Catalogue, selected: &[&Signature]) -> String {
        let t = &self.template;
        let mut out = String::new();

        let _ = writeln!(out, "#ifndef {}", t.include_guard);
        let _ = writeln!(out, "#define {}", t.include_guard);
        out.push('\n');
        for include in &t.system_includes {
            let _ = writeln!(out, "#include <{}>", include);
        }
        out.push('\n');
        for include in &t.local_includes {
            let _ = writeln!(out, "#include \"{}\"", include);
        }
        out.push('\n');
        let _ = writeln!(out, "namespace {}\n{{", t.namespace);

        out.push_str("    namespace specifics\n    {\n");
        for signature in catalogue.iter() {
            out.push_str(&render_wrapper(signature));
            out.push('\n');
        }
        out.push_str("    }\n\n");

        out.push_str("    namespace fulls\n    {\n");
        for signature in selected {
            let _ = writeln!(out, "{INDENT}using primitives::{};", signature.name);
        }
        out.push_str("    }\n\n");

        out.push_str("    namespace partials\n    {\n");
        let _ = writeln!(out, "{INDENT}using namespace specifics;");
        out.push_str("    }\n}\n\n");

        let _ = writeln!(out, "#endif // {}", t.include_guard);
        out
    }
}

/// Boxed-call wrapper forwarding to the primitive's vector-of-any overload.
fn render_wrapper(signature: &Signature) -> String {
    let names = signature.argument_names();
    let params: Vec<String> = signature
        .parameters
        .iter()
        .zip(&names)
        .map(|(p, name)| format!("{} const& {}", p.type_text, name))
        .collect();

    format!(
        "{INDENT}inline std::any {name}({params})\n{INDENT}{{\n{INDENT}    return primitives::{name}(std::vector<std::any>{{{args}}});\n{INDENT}}}\n",
        name = signature.name,
        params = params.join(", "),
        args = names.join(", "),
    )
}

/// First signature per name, in input order.
///
/// The header's `using` lines and the engine's neuron variables are keyed
/// by name, so later overloads are dropped.
fn unique_by_name(signatures: &[Signature]) -> Vec<&Signature> {
    let mut seen = HashSet::new();
    signatures
        .iter()
        .filter(|s| {
            let first = seen.insert(s.name.as_str());
            if !first {
                tracing::debug!(signature = %s.canonical_key(), "overloaded selection dropped");
            }
            first
        })
        .collect()
}

/// Check a proposal's naming and body shape against the catalogue.
pub fn validate_proposal(proposal: &ProposedSpecialization, catalogue: &Catalogue) -> Vec<ProposalIssue> {
    let mut issues = Vec::new();

    let base = proposal.base_name();
    match base {
        None => issues.push(ProposalIssue::MissingSuffix),
        Some(base) if !catalogue.contains_name(base) => {
            issues.push(ProposalIssue::UnknownBase(base.to_string()))
        }
        Some(_) => {}
    }

    let called: Vec<&str> = CALL
        .captures_iter(&proposal.body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| catalogue.contains_name(name))
        .collect();

    if called.len() != 1 {
        issues.push(ProposalIssue::PrimitiveCalls(called.len()));
    } else if let Some(base) = base.filter(|b| catalogue.contains_name(b)) {
        if called[0] != base {
            issues.push(ProposalIssue::BaseNotCalled {
                base: base.to_string(),
                called: called[0].to_string(),
            });
        }
    }

    issues
}

lazy_static! {
    static ref CALL: Regex = Regex::new(r"\b([A-Za-z_]\w*)\s*\(").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::parse_response;

    const SOURCE: &str = r#"
///int foo(int arg0, bool arg1); // Foo things
///std::map<int, int> bar(int arg0, double arg1); // Bar things
///std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0); // Flip rows
"#;

    const RESPONSE: &str = r#"
SELECTED_PRIMITIVES:
std::vector<Eigen::MatrixXi> flipud(std::vector<Eigen::MatrixXi> arg0);
int foo(int arg0, bool arg1);
PARTIAL_PARAMETERIZATIONS:
int foo_i4(bool arg1) { return foo(4, arg1); }
int foo_bad(bool arg1) { return foo(bar(1, 2.0).size(), arg1); }
int qux_i1(bool arg1) { return foo(1, arg1); }
DEPTH_LEVEL: 2
"#;

    fn render() -> GeneratedModule {
        let catalogue = Catalogue::parse(SOURCE);
        let response = parse_response(RESPONSE, &catalogue).unwrap();
        ModuleGenerator::default().render(
            &catalogue,
            &response,
            &EngineTemplate::new("// prologue\n", "// epilogue\n"),
        )
    }

    #[test]
    fn test_header_shape() {
        let module = render();
        let header = &module.header;

        assert!(header.starts_with("#ifndef AICPP_PARTIALS_H\n#define AICPP_PARTIALS_H\n"));
        assert!(header.contains("#include <any>\n#include <map>\n#include <vector>\n"));
        assert!(header.contains("#include \"aicpp/primitives.h\"\n"));
        assert!(header.ends_with("#endif // AICPP_PARTIALS_H\n"));

        // One wrapper per catalogue entry.
        assert_eq!(header.matches("inline std::any ").count(), 3);
        assert!(header.contains(
            "        inline std::any foo(int const& arg0, bool const& arg1)\n        {\n            return primitives::foo(std::vector<std::any>{arg0, arg1});\n        }\n"
        ));

        assert!(header.contains(
            "    namespace fulls\n    {\n        using primitives::flipud;\n        using primitives::foo;\n    }\n"
        ));
        assert!(header.contains("    namespace partials\n    {\n        using namespace specifics;\n    }\n"));
    }

    #[test]
    fn test_proposals_are_not_emitted() {
        let module = render();
        assert!(!module.header.contains("foo_i4"));
        assert!(!module.engine_source.contains("foo_i4"));
        assert_eq!(module.deferred.len(), 3);
    }

    #[test]
    fn test_engine_source_splices_registrations() {
        let module = render();
        assert_eq!(
            module.engine_source,
            concat!(
                "// prologue\n",
                "    Neuron flipud_neuron{\"flipud\", fulls::flipud, {typeid(std::vector<Eigen::MatrixXi>)}, typeid(std::vector<Eigen::MatrixXi>)};\n",
                "    neurons.emplace_back(flipud_neuron);\n",
                "    Neuron foo_neuron{\"foo\", fulls::foo, {typeid(int), typeid(bool)}, typeid(int)};\n",
                "    neurons.emplace_back(foo_neuron);\n",
                "// epilogue\n",
            )
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render(), render());
    }

    #[test]
    fn test_validation() {
        let module = render();
        assert!(module.deferred[0].is_well_formed());
        assert_eq!(module.deferred[1].issues, vec![ProposalIssue::PrimitiveCalls(2)]);
        assert_eq!(
            module.deferred[2].issues,
            vec![ProposalIssue::UnknownBase("qux".to_string())]
        );
    }

    #[test]
    fn test_base_not_called() {
        let catalogue = Catalogue::parse(SOURCE);
        let proposal = ProposedSpecialization {
            signature: Signature::parse("int foo_x(int arg0);").unwrap(),
            body: "return bar(arg0, 1.0).size();".to_string(),
        };
        assert_eq!(
            validate_proposal(&proposal, &catalogue),
            vec![ProposalIssue::BaseNotCalled {
                base: "foo".to_string(),
                called: "bar".to_string(),
            }]
        );
    }

    #[test]
    fn test_duplicate_selection_registered_once() {
        let catalogue = Catalogue::parse(SOURCE);
        let foo = catalogue.get_by_name("foo").unwrap().clone();
        let response = ModelResponse {
            selected: vec![foo.clone(), foo],
            proposals: vec![],
            depth: 1,
        };
        let module = ModuleGenerator::default().render(&catalogue, &response, &EngineTemplate::default());
        assert_eq!(module.registrations.len(), 1);
        assert_eq!(module.header.matches("using primitives::foo;").count(), 1);
    }

    #[test]
    fn test_selected_overload_keeps_first() {
        let catalogue = Catalogue::parse("///int foo(int a); // Int\n///int foo(bool a); // Bool\n");
        let response = ModelResponse {
            selected: vec![
                Signature::parse("int foo(int a);").unwrap(),
                Signature::parse("int foo(bool a);").unwrap(),
            ],
            proposals: vec![],
            depth: 1,
        };
        let module = ModuleGenerator::default().render(&catalogue, &response, &EngineTemplate::default());

        assert_eq!(module.registrations.len(), 1);
        assert_eq!(
            module.registrations[0],
            Registration::from_signature(&response.selected[0])
        );
        assert_eq!(module.engine_source.matches("Neuron foo_neuron").count(), 1);
        assert!(module
            .engine_source
            .contains("Neuron foo_neuron{\"foo\", fulls::foo, {typeid(int)}, typeid(int)};"));
        assert_eq!(module.header.matches("using primitives::foo;").count(), 1);
    }

    #[test]
    fn test_unnamed_parameters_use_positional_names() {
        let catalogue = Catalogue::parse("///int add(int, int); // Add\n");
        let module = ModuleGenerator::default().render(
            &catalogue,
            &ModelResponse {
                selected: vec![],
                proposals: vec![],
                depth: 0,
            },
            &EngineTemplate::default(),
        );
        assert!(module.header.contains("inline std::any add(int const& arg0, int const& arg1)"));
        assert!(module.header.contains("std::vector<std::any>{arg0, arg1}"));
    }

    #[tokio::test]
    async fn test_write_and_load_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModuleLayout::rooted(dir.path());

        assert!(EngineTemplate::load(&layout).await.is_err());

        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(&layout.prologue, "// prologue\n").unwrap();
        std::fs::write(&layout.epilogue, "// epilogue\n").unwrap();
        let template = EngineTemplate::load(&layout).await.unwrap();
        assert_eq!(template.prologue, "// prologue\n");

        let module = render();
        module.write(&layout).await.unwrap();
        assert_eq!(std::fs::read_to_string(&layout.header).unwrap(), module.header);
        assert_eq!(
            std::fs::read_to_string(&layout.engine_source).unwrap(),
            module.engine_source
        );
    }
}
