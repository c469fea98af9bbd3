use super::*;
use serde_json::json;

fn matched(text: &str) -> Extraction {
    match TaggedMatcher.scan(text, 0) {
        MatchOutcome::Matched(extraction) => extraction,
        other => panic!("expected a match, got {other:?}"),
    }
}

fn calls(extraction: &Extraction) -> Vec<&ExtractedCall> {
    extraction
        .items
        .iter()
        .filter_map(|item| match item {
            Extracted::Call(call) => Some(call),
            Extracted::Outcome { .. } => None,
        })
        .collect()
}

// -- wrapped blocks -------------------------------------------------------

#[test]
fn wrapped_invoke_with_parameters() {
    let text = r#"Reading now. <function_calls><invoke name="read-file" id="t1"><parameter name="path">src/a.ts</parameter><parameter name="limit">40</parameter></invoke></function_calls> then more"#;
    let extraction = matched(text);
    assert_eq!(&text[..extraction.start], "Reading now. ");
    assert_eq!(&text[extraction.end..], " then more");

    let calls = calls(&extraction);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read-file");
    assert_eq!(calls[0].id.as_deref(), Some("t1"));
    assert_eq!(calls[0].input["path"], json!("src/a.ts"));
    assert_eq!(calls[0].input["limit"], json!(40));
}

#[test]
fn wrapped_mixed_formats_keep_document_order() {
    let text = "<function_calls>\n\
        <function_call><tool>git-status</tool><args_json><![CDATA[{\"short\":true}]]></args_json></function_call>\n\
        <invoke name=\"git-diff\"><parameter name=\"staged\">true</parameter></invoke>\n\
        </function_calls>";
    let extraction = matched(text);
    let calls = calls(&extraction);
    let names: Vec<_> = calls.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["git-status", "git-diff"]);
    assert_eq!(calls[0].input["short"], json!(true));
    assert_eq!(calls[1].input["staged"], json!(true));
    assert!(calls[0].id.is_none());
}

#[test]
fn unwrapped_invoke_is_matched() {
    let text = r#"<invoke name="list-files"><parameter name="dir">.</parameter></invoke>"#;
    let extraction = matched(text);
    assert_eq!((extraction.start, extraction.end), (0, text.len()));
    assert_eq!(calls(&extraction)[0].input["dir"], json!("."));
}

#[test]
fn self_closing_invoke_has_empty_input() {
    let text = r#"<function_calls><invoke name="git-status"/></function_calls>"#;
    let extraction = matched(text);
    assert!(calls(&extraction)[0].input.is_empty());
}

#[test]
fn unwrapped_self_closing_invoke_is_matched() {
    let text = r#"Checking. <invoke name="git-status" id="t9"/> then done"#;
    let extraction = matched(text);
    assert_eq!(&text[..extraction.start], "Checking. ");
    assert_eq!(&text[extraction.end..], " then done");
    let calls = calls(&extraction);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "git-status");
    assert_eq!(calls[0].id.as_deref(), Some("t9"));
    assert!(calls[0].input.is_empty());
}

#[test]
fn self_closing_invoke_without_name_is_opaque() {
    let text = "<invoke /> rest";
    assert_eq!(
        TaggedMatcher.scan(text, 0),
        MatchOutcome::Opaque { start: 0, end: 10 }
    );
}

#[test]
fn function_call_with_id_element() {
    let text = "<function_call><id>call_7</id><tool>create-pr</tool><arguments>{\"title\":\"Fix\"}</arguments></function_call>";
    let extraction = matched(text);
    let call = calls(&extraction)[0];
    assert_eq!(call.id.as_deref(), Some("call_7"));
    assert_eq!(call.input["title"], json!("Fix"));
}

// -- value handling ---------------------------------------------------------

#[test]
fn parameter_values_are_decoded() {
    let text = "<invoke name=\"write-file\">\
        <parameter name=\"content\"><![CDATA[if a < b && c {}]]></parameter>\
        <parameter name=\"note\">fish &amp; chips</parameter>\
        <parameter name=\"tags\">[\"a\",\"b\"]</parameter>\
        <parameter name=\"label\">not json {</parameter>\
        </invoke>";
    let extraction = matched(text);
    let input = &calls(&extraction)[0].input;
    assert_eq!(input["content"], json!("if a < b && c {}"));
    assert_eq!(input["note"], json!("fish & chips"));
    assert_eq!(input["tags"], json!(["a", "b"]));
    assert_eq!(input["label"], json!("not json {"));
}

#[test]
fn malformed_xml_falls_back_to_permissive_parse() {
    let text = r#"<function_calls><invoke name="search"><parameter name="query">a < b & c</parameter></invoke></function_calls>"#;
    let extraction = matched(text);
    let call = calls(&extraction)[0];
    assert_eq!(call.name, "search");
    assert_eq!(call.input["query"], json!("a < b & c"));
}

#[test]
fn permissive_parse_is_case_insensitive() {
    let text = r#"<FUNCTION_CALLS><Invoke Name='read-file'><Parameter name="path">x</Parameter></Invoke></FUNCTION_CALLS>"#;
    let extraction = matched(text);
    assert_eq!(calls(&extraction)[0].input["path"], json!("x"));
}

#[test]
fn strict_parser_rejects_non_object_arguments() {
    let result = parse_calls_strict("<function_call><tool>x</tool><args_json>[1]</args_json></function_call>");
    assert!(result.is_err());
}

// -- tool results -------------------------------------------------------------

#[test]
fn tool_result_becomes_outcome() {
    let text = r#"<tool_result id="t1">{"lines": 3}</tool_result>"#;
    let extraction = matched(text);
    assert_eq!(
        extraction.items,
        vec![Extracted::Outcome {
            id: "t1".to_string(),
            output: json!({"lines": 3}),
            is_error: false,
        }]
    );
}

#[test]
fn tool_result_error_flag() {
    let text = r#"<tool_result id="t2" is_error="true">permission denied</tool_result>"#;
    let extraction = matched(text);
    assert!(matches!(
        &extraction.items[0],
        Extracted::Outcome { is_error: true, output, .. } if output == &json!("permission denied")
    ));
}

#[test]
fn tool_result_without_id_is_opaque() {
    let text = "<tool_result>orphan</tool_result>";
    assert_eq!(
        TaggedMatcher.scan(text, 0),
        MatchOutcome::Opaque {
            start: 0,
            end: text.len()
        }
    );
}

// -- streaming states ---------------------------------------------------------

#[test]
fn unclosed_block_is_pending() {
    let text = "ok <function_calls><invoke name=\"x\"><parameter name=\"a\">1";
    assert_eq!(TaggedMatcher.scan(text, 0), MatchOutcome::Pending { start: 3 });
}

#[test]
fn partial_opener_is_not_a_candidate() {
    assert_eq!(TaggedMatcher.scan("text <function_ca", 0), MatchOutcome::NoCandidate);
    assert_eq!(TaggedMatcher.scan("text <invoke", 0), MatchOutcome::NoCandidate);
}

#[test]
fn unrelated_tags_are_ignored() {
    assert_eq!(
        TaggedMatcher.scan("<div>hello</div> <invoker>x</invoker>", 0),
        MatchOutcome::NoCandidate
    );
}

#[test]
fn block_without_calls_is_opaque() {
    let text = "<function_calls>nothing here</function_calls>";
    assert_eq!(
        TaggedMatcher.scan(text, 0),
        MatchOutcome::Opaque {
            start: 0,
            end: text.len()
        }
    );
}

#[test]
fn scan_respects_from_offset() {
    let text = r#"<invoke name="a"></invoke><invoke name="b"></invoke>"#;
    let first = matched(text);
    let MatchOutcome::Matched(second) = TaggedMatcher.scan(text, first.end) else {
        panic!("expected second match");
    };
    assert_eq!(calls(&second)[0].name, "b");
}

// -- helpers ------------------------------------------------------------------

#[test]
fn decode_entities_leaves_unknown_sequences() {
    assert_eq!(decode_xml_entities("a &amp; b &copy; &lt;c&gt;"), "a & b &copy; <c>");
    assert!(matches!(decode_xml_entities("plain"), Cow::Borrowed("plain")));
}

#[test]
fn unwrap_cdata_concatenates_sections() {
    assert_eq!(unwrap_cdata("<![CDATA[a]]> <![CDATA[b]]>"), "ab");
    assert_eq!(unwrap_cdata("<![CDATA[unterminated"), "<![CDATA[unterminated");
}

#[test]
fn extract_attr_respects_word_boundaries() {
    let attrs = r#" tool_call_id="x" id='t1' name = "n" "#;
    assert_eq!(extract_attr(attrs, b"id").as_deref(), Some("t1"));
    assert_eq!(extract_attr(attrs, b"name").as_deref(), Some("n"));
    assert!(extract_attr(attrs, b"missing").is_none());
}
