use rstest::rstest;

use super::check;
use crate::script::ScriptKind;
use crate::syntax::validate;

fn messages(source: &str) -> Vec<String> {
    check(source)
        .into_iter()
        .map(|diagnostic| diagnostic.message)
        .collect()
}

#[rstest]
#[case::simple("Write-Host 'hello'\n")]
#[case::if_chain("if ($x -eq 1) {\n  'one'\n} elseif ($x -eq 2) {\n  'two'\n}\nelse {\n  'many'\n}\n")]
#[case::loops("foreach ($item in $items) { $item }\nfor ($i = 0; $i -lt 3; $i++) { $i }\nwhile ($true) { break }\n")]
#[case::do_while("do {\n  $n++\n} while ($n -lt 5)\ndo { $n-- } until ($n -eq 0)\n")]
#[case::switch_statement("switch -Regex ($name) {\n  '^a' { 'starts with a' }\n  default { 'other' }\n}\n")]
#[case::try_catch_finally("try {\n  Get-Item x\n}\ncatch [System.IO.IOException], [System.UnauthorizedAccessException] {\n  $_\n}\ncatch {\n  throw\n}\nfinally {\n  'done'\n}\n")]
#[case::try_finally("try { 1 } finally { 2 }\n")]
#[case::functions("function Install-Thing {\n  [CmdletBinding(SupportsShouldProcess)]\n  param(\n    [Parameter(Mandatory)][string]$Name\n  )\n  begin { }\n  process { $Name }\n  end { }\n}\nfunction Get-Two($a, $b) { $a + $b }\nfilter Only-Even { if ($_ % 2 -eq 0) { $_ } }\n")]
#[case::strings("'it''s'\n\"say \"\"hi\"\" `\"now`\"\"\n\"$(Get-Date -Format 'yyyy')\"\n")]
#[case::here_strings("$a = @'\n} ) ] if {\n'@\n$b = @\"\nvalue: $(1 + 2)\n\"@\n")]
#[case::comments("# } not code\n<#\n.SYNOPSIS\n  Does things }\n#>\nWrite-Host done # trailing {\n")]
#[case::collections("$h = @{ Name = 'x'; Items = @(1, 2, 3) }\n$arr[0]\n[Math]::Round($h.Count)\n")]
#[case::braced_variable("${env:ProgramFiles(x86)}\n")]
#[case::continuation("Get-ChildItem `\n  -Recurse\n")]
#[case::pipeline_blocks("Get-Service | Where-Object { $_.Status -eq 'Running' } | ForEach-Object { $_.Name }\n")]
#[case::keywords_as_arguments("Write-Output if else try catch\n")]
#[case::trap("trap [Exception] { continue }\n")]
#[case::pipeline_continued_on_next_line("Get-Service |\n  foreach { $_.Name }\n")]
#[case::pipeline_continued_after_comment("Get-Service | # running only\n  Where-Object Status -eq 'Running'\n")]
#[case::foreach_alias_with_block("foreach { $_ }\n")]
#[case::foreach_alias_with_parameter("foreach -MemberName Name\n")]
#[case::keyword_hashtable_keys("$h = @{ Process = 'x'; End = 2 }\n$i = @{\n  Begin = 1\n  If = 'y'\n}\n")]
fn accepts_valid_scripts(#[case] source: &str) {
    assert_eq!(messages(source), Vec::<String>::new());
}

#[rstest]
#[case::unclosed_brace("function Foo {\n  'x'\n", "`{` opened at line 1 is never closed (expected `}`)")]
#[case::unclosed_paren("Write-Host (1 + 2\n", "`(` opened at line 1 is never closed (expected `)`)")]
#[case::stray_brace("}\n", "unexpected `}`")]
#[case::mismatched("if ($x) { (1 }\n)\n}\n", "unexpected `}` (expected `)` to close `(` opened at line 1)")]
#[case::string("Write-Host \"oops\n", "unterminated string literal")]
#[case::single_string("Write-Host 'oops\n", "unterminated string literal")]
#[case::here_string("$a = @'\nbody\n", "unterminated here-string (expected `'@` at the start of a line)")]
#[case::block_comment("<# never closed\n", "unterminated block comment (expected `#>`)")]
#[case::if_without_condition("if { 'x' }\n", "`if` at line 1 is missing its `(` condition")]
#[case::if_without_block("if ($x) 'x'\n", "`if` at line 1 is missing its `{` block")]
#[case::foreach_at_end("foreach\n", "`foreach` at line 1 is missing its `(` condition")]
#[case::foreach_without_block("foreach ($x in $y) 'x'\n", "`foreach` at line 1 is missing its `{` block")]
#[case::keyword_outside_hashtable("process = 1\n", "`process` at line 1 is missing its `{` block")]
#[case::else_without_if("else { 'x' }\n", "`else` must follow an `if` or `elseif` block")]
#[case::elseif_without_if("Write-Host 1\nelseif ($y) { }\n", "`elseif` must follow an `if` or `elseif` block")]
#[case::catch_without_try("catch { }\n", "`catch` must follow a `try` or `catch` block")]
#[case::finally_without_try("finally { }\n", "`finally` must follow a `try` or `catch` block")]
#[case::try_without_handler("try { 1 }\nWrite-Host 2\n", "`try` block at line 1 is missing a `catch` or `finally` block")]
#[case::try_at_end("try { 1 }\n", "`try` block at line 1 is missing a `catch` or `finally` block")]
#[case::function_without_name("function {\n}\n", "`function` at line 1 is missing a name")]
#[case::function_without_body("function Foo\nWrite-Host 1\n", "`function` at line 1 is missing its `{` block")]
#[case::do_without_condition("do { 1 }\nWrite-Host 2\n", "`do` block at line 1 is missing its `while` or `until` condition")]
fn reports_structural_problems(#[case] source: &str, #[case] expected: &str) {
    let found = messages(source);
    assert_eq!(found.first().map(String::as_str), Some(expected), "{found:?}");
}

#[test]
fn nested_try_in_function_body_is_checked_at_close() {
    let found = messages("function Foo {\n  try { 1 }\n}\n");
    assert_eq!(
        found,
        vec![String::from("`try` block at line 2 is missing a `catch` or `finally` block")]
    );
}

#[test]
fn reports_position_of_unclosed_opener() {
    let result = validate(ScriptKind::PowerShell, "'ok'\n  @(1, 2\n");
    let error = result.errors.first().cloned();
    assert_eq!(error.and_then(|error| error.line.zip(error.column)), Some((2, 3)));
}

#[test]
fn malformed_input_never_panics() {
    for source in ["@'", "@\"\n", "<#", "$(", "${", "\"$(", "`", "((((", "}}}", "function", "try"] {
        let _ = check(source);
    }
}
