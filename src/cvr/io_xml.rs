use crate::cvr::io_common::parse_flag;
use crate::cvr::*;

use snafu::{OptionExt, ResultExt};

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::PathBuf;

/// Lists the `*.xml` documents of a directory, in sorted order.
pub fn list_xml_files(dir: &str) -> CvrResult<Vec<String>> {
    let mut res: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).context(OpeningFileSnafu { path: dir })? {
        let entry = entry.context(OpeningFileSnafu { path: dir })?;
        let p = entry.path();
        let is_xml = p
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if is_xml && p.is_file() {
            res.push(p);
        }
    }
    res.sort();
    Ok(res
        .iter()
        .map(|p| p.as_path().display().to_string())
        .collect())
}

pub fn read_xml_ballot(path: &str) -> CvrResult<ParsedBallot> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    parse_xml_ballot(&contents, path)
}

#[derive(Default)]
struct PartialSelection {
    name: Option<String>,
    id: Option<String>,
    value: Option<i64>,
}

#[derive(Default)]
struct PartialContest {
    name: Option<String>,
    id: Option<String>,
    undervotes: i64,
    selections: Vec<ParsedSelection>,
}

#[derive(Default)]
struct PartialBallot {
    guid: Option<String>,
    batch_sequence: Option<i64>,
    sheet_number: Option<i64>,
    precinct_name: Option<String>,
    precinct_id: Option<String>,
    is_blank: bool,
    contests: Vec<ParsedContest>,
    contest: PartialContest,
    selection: PartialSelection,
}

/// Decodes a single ballot document.
///
/// Elements are matched on their local names, so the documents may or may not
/// declare a namespace. Unknown elements are ignored.
pub fn parse_xml_ballot(contents: &str, path: &str) -> CvrResult<ParsedBallot> {
    let mut reader = Reader::from_str(contents);
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut pb = PartialBallot::default();

    loop {
        match reader.read_event().context(ParsingXmlSnafu { path })? {
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                text.clear();
            }
            Event::Empty(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                close_element(&mut pb, &stack, "", path)?;
                stack.pop();
            }
            Event::End(_) => {
                close_element(&mut pb, &stack, text.trim(), path)?;
                stack.pop();
                text.clear();
            }
            Event::Text(e) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e));
            }
            Event::GeneralRef(e) => match e.resolve_char_ref().context(ParsingXmlSnafu { path })? {
                Some(c) => text.push(c),
                None => {
                    let name = e
                        .decode()
                        .map_err(quick_xml::Error::from)
                        .context(ParsingXmlSnafu { path })?;
                    match resolve_predefined_entity(&name) {
                        Some(value) => text.push_str(value),
                        None => {
                            text.push('&');
                            text.push_str(&name);
                            text.push(';');
                        }
                    }
                }
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(element) = stack.last() {
        return TruncatedXmlSnafu {
            path,
            element: element.clone(),
        }
        .fail();
    }

    let id = pb.guid.context(MissingXmlFieldSnafu {
        path,
        field: "CvrGuid",
    })?;
    Ok(ParsedBallot {
        id,
        batch_sequence: pb.batch_sequence,
        sheet_number: pb.sheet_number,
        precinct_name: pb.precinct_name,
        precinct_id: pb.precinct_id,
        is_blank: pb.is_blank,
        contests: pb.contests,
    })
}

fn close_element(pb: &mut PartialBallot, stack: &[String], value: &str, path: &str) -> CvrResult<()> {
    // The root element is skipped: only the position below it matters.
    let names: Vec<&str> = stack.iter().skip(1).map(|s| s.as_str()).collect();
    match names.as_slice() {
        ["CvrGuid"] if !value.is_empty() => {
            pb.guid = Some(value.to_string());
        }
        ["BatchSequence"] => {
            pb.batch_sequence = parse_optional_int(value, "BatchSequence", path)?;
        }
        ["SheetNumber"] => {
            pb.sheet_number = parse_optional_int(value, "SheetNumber", path)?;
        }
        ["IsBlank"] => {
            pb.is_blank = parse_flag(value).context(InvalidNumberSnafu {
                path,
                field: "IsBlank",
                value,
            })?;
        }
        ["PrecinctSplit", "Name"] if !value.is_empty() => {
            pb.precinct_name = Some(value.to_string());
        }
        ["PrecinctSplit", "Id"] if !value.is_empty() => {
            pb.precinct_id = Some(value.to_string());
        }
        ["Contests", "Contest", "Name"] => {
            pb.contest.name = Some(value.to_string());
        }
        ["Contests", "Contest", "Id"] => {
            pb.contest.id = Some(value.to_string());
        }
        ["Contests", "Contest", "Undervotes"] => {
            pb.contest.undervotes = parse_optional_int(value, "Undervotes", path)?.unwrap_or(0);
        }
        ["Contests", "Contest", "Options", "Option", "Name"] => {
            pb.selection.name = Some(value.to_string());
        }
        ["Contests", "Contest", "Options", "Option", "Id"] => {
            pb.selection.id = Some(value.to_string());
        }
        ["Contests", "Contest", "Options", "Option", "Value"] => {
            pb.selection.value = parse_optional_int(value, "Option/Value", path)?;
        }
        ["Contests", "Contest", "Options", "Option"] => {
            let sel = std::mem::take(&mut pb.selection);
            pb.contest.selections.push(ParsedSelection {
                candidate_name: sel.name.context(MissingXmlFieldSnafu {
                    path,
                    field: "Option/Name",
                })?,
                candidate_id: sel.id.context(MissingXmlFieldSnafu {
                    path,
                    field: "Option/Id",
                })?,
                value: sel.value.context(MissingXmlFieldSnafu {
                    path,
                    field: "Option/Value",
                })?,
            });
        }
        ["Contests", "Contest"] => {
            let c = std::mem::take(&mut pb.contest);
            pb.contests.push(ParsedContest {
                name: c.name.context(MissingXmlFieldSnafu {
                    path,
                    field: "Contest/Name",
                })?,
                id: c.id.context(MissingXmlFieldSnafu {
                    path,
                    field: "Contest/Id",
                })?,
                undervotes: c.undervotes,
                selections: c.selections,
            });
        }
        _ => {}
    }
    Ok(())
}

fn parse_optional_int(value: &str, field: &str, path: &str) -> CvrResult<Option<i64>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i64>()
        .ok()
        .context(InvalidNumberSnafu { path, field, value })
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALLOT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Cvr xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns="http://tempuri.org/CVRDesign.xsd">
  <CvrGuid> 0b7e-41aa </CvrGuid>
  <BatchSequence>12</BatchSequence>
  <SheetNumber>1</SheetNumber>
  <IsBlank>false</IsBlank>
  <PrecinctSplit>
    <Name>Ward 1 Precinct 2</Name>
    <Id>102</Id>
  </PrecinctSplit>
  <Contests>
    <Contest>
      <Name>MAYOR</Name>
      <Id>1</Id>
      <Undervotes>0</Undervotes>
      <Options>
        <Option><Name>CARA SPENCER</Name><Id>11</Id><Value>1</Value></Option>
        <Option><Name>TISHAURA O. JONES</Name><Id>12</Id><Value>0</Value></Option>
      </Options>
    </Contest>
    <Contest>
      <Name>ALDERMAN - WARD 1</Name>
      <Id>7</Id>
      <Undervotes/>
      <Options>
        <Option><Name>ANNE &amp; &#x42;OB &quot;JR&quot;</Name><Id>71</Id><Value>1</Value></Option>
      </Options>
    </Contest>
  </Contests>
</Cvr>"#;

    #[test]
    fn full_ballot() {
        let b = parse_xml_ballot(BALLOT, "b.xml").unwrap();
        assert_eq!(b.id, "0b7e-41aa");
        assert_eq!(b.batch_sequence, Some(12));
        assert_eq!(b.sheet_number, Some(1));
        assert!(!b.is_blank);
        assert_eq!(b.precinct_name.as_deref(), Some("Ward 1 Precinct 2"));
        assert_eq!(b.precinct_id.as_deref(), Some("102"));
        assert_eq!(b.contests.len(), 2);
        let mayor = &b.contests[0];
        assert_eq!(mayor.name, "MAYOR");
        assert_eq!(mayor.id, "1");
        assert_eq!(
            mayor.selections,
            vec![
                ParsedSelection {
                    candidate_name: "CARA SPENCER".to_string(),
                    candidate_id: "11".to_string(),
                    value: 1
                },
                ParsedSelection {
                    candidate_name: "TISHAURA O. JONES".to_string(),
                    candidate_id: "12".to_string(),
                    value: 0
                },
            ]
        );
        let ward = &b.contests[1];
        assert_eq!(ward.undervotes, 0);
        assert_eq!(ward.selections[0].candidate_name, "ANNE & BOB \"JR\"");
    }

    #[test]
    fn entity_references() {
        let b = parse_xml_ballot("<Cvr><CvrGuid>a&lt;&#65;&apos;&nbsp;</CvrGuid></Cvr>", "b.xml").unwrap();
        // Unknown entities are kept as written.
        assert_eq!(b.id, "a<A'&nbsp;");
        let res = parse_xml_ballot("<Cvr><CvrGuid>&#0;</CvrGuid></Cvr>", "b.xml");
        assert!(matches!(res, Err(CvrError::ParsingXml { .. })));
    }

    #[test]
    fn minimal_ballot() {
        let b = parse_xml_ballot("<Cvr><CvrGuid>g1</CvrGuid></Cvr>", "b.xml").unwrap();
        assert_eq!(b.id, "g1");
        assert_eq!(b.batch_sequence, None);
        assert_eq!(b.precinct_id, None);
        assert!(b.contests.is_empty());
    }

    #[test]
    fn missing_guid() {
        let res = parse_xml_ballot("<Cvr><IsBlank>true</IsBlank></Cvr>", "b.xml");
        assert!(matches!(res, Err(CvrError::MissingXmlField { .. })));
    }

    #[test]
    fn missing_option_value() {
        let xml = "<Cvr><CvrGuid>g1</CvrGuid><Contests><Contest><Name>M</Name><Id>1</Id>\
            <Options><Option><Name>A</Name><Id>2</Id></Option></Options></Contest></Contests></Cvr>";
        let res = parse_xml_ballot(xml, "b.xml");
        assert!(matches!(res, Err(CvrError::MissingXmlField { .. })));
    }

    #[test]
    fn bad_number() {
        let xml = "<Cvr><CvrGuid>g1</CvrGuid><SheetNumber>one</SheetNumber></Cvr>";
        let res = parse_xml_ballot(xml, "b.xml");
        assert!(matches!(res, Err(CvrError::InvalidNumber { .. })));
    }

    #[test]
    fn truncated_document() {
        assert!(parse_xml_ballot("<Cvr><CvrGuid>", "b.xml").is_err());
    }

    #[test]
    fn sorted_listing() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xml", "a.XML", "c.txt"] {
            fs::write(dir.path().join(name), "<Cvr/>").unwrap();
        }
        let files = list_xml_files(dir.path().to_str().unwrap()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| crate::cvr::io_common::simplify_file_name(p))
            .collect();
        assert_eq!(names, vec!["a.XML", "b.xml"]);
    }
}
