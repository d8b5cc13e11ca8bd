/*!

This is the long-form manual for `approval_voting` and `apcvr`.

## What is computed

For an approval contest (each ballot approves zero or more candidates), the analysis produces:

* a co-approval matrix: for every ordered pair of candidates `(A, B)`, the number of ballots
  approving both, and the percentage of the ballots approving `A` that also approved `B`.
  The rate is not symmetric: `rate(A, B)` and `rate(B, A)` have different denominators.
* voting patterns: total ballots, the distribution of the number of approvals per ballot,
  bullet votes (exactly one approval), full approvals (every candidate), the average number
  of approvals, the most common combination of candidates, the distribution of ballot sizes
  for each candidate, and the "anyone but" analysis (ballots approving every candidate but one).

Two modes are available:

* `PerContest`: pairs `(A, B)` are skipped when nobody approved `A`.
* `ElectionWide`: candidates of all the contests are merged under the key `"{candidate} ({contest})"`.
  The matrix always contains every pair. The cross-contest behavior of the voters is also computed:
  a voter who approved more than one candidate in at least one contest is a multi-approval voter.

With fewer than two ballots or two candidates, the analysis is empty.

## Input formats

The following formats are supported by `apcvr`:
* `xml` a directory of XML documents, one per ballot
* `json` a JSON array of flat ballot objects

### `xml`

Every `*.xml` file of the directory describes one ballot. Namespaces are ignored.

```text
<Cvr>
  <CvrGuid>f1c3...</CvrGuid>
  <BatchSequence>12</BatchSequence>
  <SheetNumber>1</SheetNumber>
  <IsBlank>false</IsBlank>
  <PrecinctSplit><Name>Ward 1 Precinct 2</Name><Id>102</Id></PrecinctSplit>
  <Contests>
    <Contest>
      <Name>MAYOR</Name><Id>1</Id><Undervotes>0</Undervotes>
      <Options>
        <Option><Name>ANN LEE</Name><Id>11</Id><Value>1</Value></Option>
      </Options>
    </Contest>
  </Contests>
</Cvr>
```

Only `CvrGuid` is mandatory for the ballot. Each contest needs a `Name` and an `Id`, each option
a `Name`, an `Id` and a `Value`. An option with the value `1` is an approval.

### `json`

The file contains an array of objects. All the keys starting with `vote_` (see `votePrefix`) whose
value is a non-empty string are approvals for the candidate with this name. The ballot id is read
from the `tracking` key (see `idField`), or derived from the file name and the position in the array.

```text
[
  {"tracking": "b-001", "vote_1": "Emily Buss", "vote_2": "Jeff Marshall", "vote_3": ""},
  {"tracking": "b-002", "vote_1": "Tynley Bean"}
]
```

All the ballots of a JSON file belong to the single contest named in the file source.

## Configuration

`apcvr` accepts a configuration file in JSON:

```text
{
  "source": "st_louis",
  "cvrDatabase": "cvr-data.sqlite3",
  "reportDatabase": "../data.sqlite3",
  "electionDate": "2025-03-04",
  "batchSize": 5000,
  "cvrFileSources": [
    {"provider": "xml", "filePath": "data/ballots"},
    {"provider": "json", "filePath": "cvr.json", "contestName": "Utah Senate District 11"}
  ],
  "contestReports": [
    {"contestName": "Utah Senate District 11", "reportPath": "us/ut/senate_district_11/2025/12"}
  ],
  "electionWide": {
    "name": "St. Louis Primary Municipal Election",
    "date": "2025-03-04",
    "jurisdictionPath": "us/mo/st_louis",
    "electionPath": "2025/03",
    "jurisdictionName": "St. Louis, MO",
    "electionName": "Primary Municipal Election"
  }
}
```

Paths are relative to the configuration file. The `source` labels all the rows written to the
normalized store, so that several origins can live in the same database.

Contests are matched to reports by their path (`contestReports`), or else by their office: the
contest name in lower case, with `" - "` replaced by `-` and the spaces removed
(`ALDERMAN - WARD 3` becomes `alderman-ward3`), on the `electionDate`.

Running the same configuration twice leaves the databases in the same state.

 */
