use std::collections::BTreeSet;

use perfdash_storage::ReportTemplateStore;

use crate::error::Result;

/// Expands report template ids into the union of the tests they cover.
///
/// Returns `None` when no template id was given, so that no allow-set filter
/// applies. Unknown ids contribute nothing; if every id is unknown the result
/// is an empty set, which matches no record.
pub fn expand(
    resolver: &dyn ReportTemplateStore,
    template_ids: &[String],
) -> Result<Option<BTreeSet<String>>> {
    if template_ids.is_empty() {
        return Ok(None);
    }

    let mut union = BTreeSet::new();
    for id in template_ids {
        let tests = resolver.test_keys_for_template(id)?;
        if tests.is_empty() {
            tracing::debug!(template = %id, "Report template resolved to no tests");
        }
        union.extend(tests);
    }
    Ok(Some(union))
}
