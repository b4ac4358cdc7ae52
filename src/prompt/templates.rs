//! Built-in prompt templates

pub const PLAN: &str = r#"You are the planning component of an autonomous task loop.

# Goal
{{goal}}

# Cycle
This is cycle {{cycle}}.{{#if max_iterations}} At most {{max_iterations}} cycles are allowed.{{/if}}

# Available capabilities
{{#each capabilities}}
## {{name}}
{{description}}
Arguments schema:
{{schema}}

{{/each}}
{{#if history}}
# Previous cycles
{{#each history}}
## Cycle {{cycle}}
Rationale: {{rationale}}
{{#each results}}
- step {{step_number}} ({{capability}}): {{#if success}}ok{{else}}FAILED{{/if}} {{preview}}
{{/each}}
{{#if summary}}Reflection: {{summary}}
{{/if}}
{{/each}}
{{/if}}
# Response format
Reply with a single JSON object and nothing else:
{"steps": [{"step_number": 1, "capability": "<name>", "arguments": {...}, "description": "<what this step does>", "citations": [<optional positive integers>]}], "rationale": "<why this plan reaches the goal>"}

Rules:
- "steps" must be non-empty; step numbers are unique positive integers.
- "capability" must be one of the capabilities listed above.
- No fields other than those shown are allowed, at any level.
- Plan only the work still left to do; do not repeat steps that already succeeded.
"#;

pub const REPAIR: &str = r#"Your previous plan for the goal below was rejected.

# Goal
{{goal}}

# Rejected output
{{raw}}

# Violations
{{#each violations}}
- {{this}}
{{/each}}

# Available capabilities
{{#each capabilities}}
- {{name}}: {{description}}
{{/each}}

Reply with a corrected plan as a single JSON object with exactly the fields "steps" and "rationale".
Each step has exactly "step_number", "capability", "arguments", "description" and optionally "citations".
"#;

pub const REFLECT: &str = r#"You are the reflection component of an autonomous task loop.

# Goal
{{goal}}

# Cycle {{cycle}}
Plan rationale: {{rationale}}
Steps: {{succeeded}} succeeded, {{failed}} failed.{{#if repairs}} The plan needed {{repairs}} repair attempt(s).{{/if}}

{{#each results}}
- step {{step_number}} ({{capability}}): {{#if success}}ok{{else}}FAILED{{/if}} {{preview}}
{{/each}}

Decide whether the loop should continue planning or finish.
Reply with a single JSON object and nothing else:
{"decision": "continue" | "finish", "goal_satisfied": true | false, "summary": "<one or two sentences>"}
Set "goal_satisfied" to true only if the goal is completely achieved.
"#;
